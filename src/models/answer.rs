// src/models/answer.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

/// Represents the 'exam_answers' table.
///
/// One row is pre-seeded per question when the session starts, so
/// "unanswered" is an explicit row with null selections rather than a
/// missing row. The recorder overwrites it until the session terminates;
/// the scoring engine then writes `is_correct`/`points_earned` once.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamAnswer {
    pub id: i64,
    pub session_id: i64,
    pub question_id: i64,

    /// Selection for 'single' and 'weighted' questions.
    pub selected_option_id: Option<i64>,

    /// Selection for 'multiple' questions, stored as a JSON id array.
    pub selected_option_ids: Option<Json<Vec<i64>>>,

    /// Free-text answer for 'short' questions.
    pub text_answer: Option<String>,

    pub is_correct: Option<bool>,
    pub points_earned: Option<f64>,
    pub answered_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ExamAnswer {
    /// Whether the student recorded anything at all for this question.
    pub fn is_answered(&self) -> bool {
        self.selected_option_id.is_some()
            || self
                .selected_option_ids
                .as_ref()
                .is_some_and(|ids| !ids.0.is_empty())
            || self
                .text_answer
                .as_ref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}
