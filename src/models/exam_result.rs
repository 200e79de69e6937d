// src/models/exam_result.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'exam_results' table: the frozen outcome of exactly
/// one session. Created once by the scoring engine, never mutated.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: i64,
    pub session_id: i64,

    /// Denormalized for query convenience.
    pub student_id: i64,
    pub package_id: i64,

    pub total_questions: i32,
    pub answered_count: i32,
    pub correct_count: i32,

    pub total_score: f64,
    pub score_twk: f64,
    pub score_tiu: f64,
    pub score_tkp: f64,

    pub is_passed: bool,

    /// Wall-clock time the attempt took, always non-negative.
    pub duration_seconds: i64,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One tracked category in the review breakdown.
#[derive(Debug, Serialize)]
pub struct CategoryBreakdown {
    pub category: String,
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// One question in the per-question review, with the full options
/// (including the answer key — the session is over) and the student's
/// recorded answer.
#[derive(Debug, Serialize)]
pub struct ReviewQuestion {
    pub question: crate::models::question::Question,
    pub options: Vec<crate::models::question::QuestionOption>,
    pub selected_option_id: Option<i64>,
    pub selected_option_ids: Option<Vec<i64>>,
    pub text_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub points_earned: Option<f64>,

    /// Whether the student flagged this question as erroneous.
    pub reported: bool,
}

/// Full review payload for a completed session.
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub result: ExamResult,
    pub package_name: String,
    pub passing_score: f64,
    pub categories: Vec<CategoryBreakdown>,
    pub questions: Vec<ReviewQuestion>,
}
