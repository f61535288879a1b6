use std::path::PathBuf;

use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "erotema",
    version,
    author,
    about = "Erotema image-to-quiz generation service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            command: None,
            verbose: 0,
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the Erotema HTTP server.
    Serve(ServeArgs),
    /// Generate quiz questions from local image files and print JSON.
    Generate(GenerateArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;

/// Run the OCR-to-question pipeline on local files.
#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// One or more image files (JPEG, PNG, WEBP) to extract text from.
    #[arg(required = true, value_name = "IMAGES")]
    pub inputs: Vec<PathBuf>,
    /// Subject the questions should cover.
    #[arg(long)]
    pub subject: String,
    /// Number of questions to generate (1-50).
    #[arg(long, default_value_t = 10)]
    pub num_questions: u32,
    /// Difficulty level (easy, medium, hard).
    #[arg(long, default_value = "medium")]
    pub difficulty: String,
    /// Comma-separated question types.
    #[arg(
        long = "question-types",
        default_value = "multiple_choice,short_answer,true_false"
    )]
    pub question_types: String,
}
