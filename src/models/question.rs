// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tracked scoring categories. Anything else falls into the general
/// bucket: it still counts toward the total but has no named subtotal.
pub const TRACKED_CATEGORIES: [&str; 3] = ["twk", "tiu", "tkp"];

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub package_id: i64,

    /// Scoring category: 'twk', 'tiu', 'tkp' or 'general'.
    pub category: String,

    /// Question type: 'single', 'multiple', 'weighted' or 'short'.
    pub question_type: String,

    /// Maximum attainable points for this question.
    pub point: f64,

    /// Position of the question within the package.
    pub order_index: i32,

    /// The text content of the question.
    pub content: String,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'question_options' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub content: String,

    /// Correctness flag, meaningful for 'single', 'multiple' and 'short'.
    pub is_correct: bool,

    /// Independent point weight, meaningful for 'weighted'.
    pub weight: Option<f64>,
}

/// DTO for sending an option to a client with an ongoing session.
/// Excludes `is_correct` and `weight` — the answer key must never reach
/// the client before the session completes.
#[derive(Debug, Serialize)]
pub struct PublicOption {
    pub id: i64,
    pub content: String,
}

/// DTO for sending a question to a client with an ongoing session,
/// including the student's currently recorded answer so a resumed
/// session can restore its state.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub category: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub point: f64,
    pub content: String,
    pub options: Vec<PublicOption>,
    pub selected_option_id: Option<i64>,
    pub selected_option_ids: Option<Vec<i64>>,
    pub text_answer: Option<String>,
}
