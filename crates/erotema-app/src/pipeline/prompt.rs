//! Prompt construction for the question generation stage.
//!
//! Pure text assembly: the extracted content is truncated to a fixed
//! character budget and embedded in a system/user message pair describing
//! the required count, difficulty, allowed types, and the strict JSON output
//! contract. Validation happens upstream; malformed specs never reach this
//! module.

use crate::pipeline::quiz::QuizSpec;

/// Characters of extracted content embedded in the prompt. Bounds token
/// usage on the generation call regardless of how much text OCR produced.
pub const CONTENT_CHAR_BUDGET: usize = 8000;

/// Message pair ready to be sent to the text model.
#[derive(Debug, Clone)]
pub struct QuestionPrompt {
    pub system_message: String,
    pub user_message: String,
}

/// Build the generation prompt for the given content and request spec.
pub fn build_question_prompt(content: &str, spec: &QuizSpec) -> QuestionPrompt {
    let truncated = truncate_chars(content, CONTENT_CHAR_BUDGET);
    let type_labels = spec
        .question_types
        .iter()
        .map(|question_type| question_type.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    let difficulty = spec.difficulty.as_ref();
    let subject = spec.subject.as_str();
    let num_questions = spec.num_questions;

    let system_message = format!(
        "You are an expert educator creating educational questions.\n\
         Generate questions based on the provided content for the subject: {subject}.\n\
         The content may contain mixed-script text.\n\
         \n\
         Generate {num_questions} questions with the following specifications:\n\
         - Difficulty level: {difficulty}\n\
         - Question types: {type_labels}\n\
         - Mix different question types if multiple types are requested\n\
         - For multiple choice questions, provide 4 options labeled A, B, C, D\n\
         - Always include the correct answer\n\
         - Ensure questions are clear, educational, and test understanding of the content\n\
         \n\
         Return the response as a valid JSON array of question objects with this structure:\n\
         [\n\
             {{\n\
                 \"question\": \"Question text here?\",\n\
                 \"question_type\": \"multiple_choice|short_answer|true_false\",\n\
                 \"options\": [\"A. Option 1\", \"B. Option 2\", \"C. Option 3\", \"D. Option 4\"] (only for multiple_choice),\n\
                 \"correct_answer\": \"Correct answer here\",\n\
                 \"difficulty\": \"{difficulty}\",\n\
                 \"subject\": \"{subject}\"\n\
             }}\n\
         ]"
    );

    let user_message = format!("Content to generate questions from:\n\n{truncated}");

    QuestionPrompt {
        system_message,
        user_message,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
