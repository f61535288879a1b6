use std::path::Path;

use bytes::Bytes;
use tracing::Level;

use erotema_app::cli::{Cli, Commands, GenerateArgs};
use erotema_app::config;
use erotema_app::error::AppError;
use erotema_app::pipeline::quiz::{Difficulty, ImageUpload, QuestionType, QuizSpec, mime_from_extension};
use erotema_app::server;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(determine_log_level(cli.verbose));

    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}

fn determine_log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Some(Commands::Serve(_)) => {
            let config = config::load()?;
            server::serve(config).await?;
            Ok(())
        }
        Some(Commands::Generate(args)) => generate(args).await,
        None => {
            Cli::print_help();
            Ok(())
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<(), AppError> {
    let spec = QuizSpec {
        subject: args.subject.clone(),
        num_questions: args.num_questions,
        difficulty: parse_difficulty(&args.difficulty)?,
        question_types: parse_question_types(&args.question_types)?,
    };

    let mut images = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        images.push(load_image(path)?);
    }

    let config = config::load()?;
    let pipeline = server::build_pipeline(&config.generation)?;

    let response = pipeline.run(&images, &spec).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn load_image(path: &Path) -> Result<ImageUpload, AppError> {
    let mime_type = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| mime_from_extension(&ext.to_ascii_lowercase()))
        .ok_or_else(|| AppError::UnsupportedExtension {
            path: path.to_path_buf(),
        })?;

    let bytes = std::fs::read(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(ImageUpload {
        bytes: Bytes::from(bytes),
        mime_type: mime_type.to_string(),
    })
}

fn parse_difficulty(value: &str) -> Result<Difficulty, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidDifficulty {
            value: value.to_string(),
        })
}

fn parse_question_types(value: &str) -> Result<Vec<QuestionType>, AppError> {
    let mut types = Vec::new();
    for label in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed: QuestionType =
            label.parse().map_err(|_| AppError::InvalidQuestionType {
                value: label.to_string(),
            })?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}
