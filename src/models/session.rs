// src/models/session.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'exam_sessions' table: one student's single attempt at
/// a package. Immutable after creation except for the violation counter
/// and the terminal status transition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: i64,
    pub student_id: i64,
    pub package_id: i64,

    /// Opaque session credential, issued at start and required in the
    /// X-Exam-Token header on every session-scoped call.
    #[serde(skip)]
    pub token: String,

    /// 'ongoing' or 'completed'.
    pub status: String,

    /// Fullscreen-exit violations reported so far.
    pub violations: i32,

    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A validated ongoing session with the package timing fields the guard
/// and handlers need, joined in a single lookup and injected into the
/// request extensions.
#[derive(Debug, Clone, FromRow)]
pub struct SessionContext {
    pub id: i64,
    pub student_id: i64,
    pub package_id: i64,
    pub violations: i32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub execution_mode: String,
    pub duration_minutes: i32,
    pub end_date: Option<chrono::NaiveDate>,
}

/// DTO returned by session start: the credential plus everything the
/// client needs to render a countdown.
#[derive(Debug, Serialize)]
pub struct StartExamResponse {
    pub token: String,
    pub session_id: i64,
    pub package_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_minutes: i32,
    pub execution_mode: String,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,

    /// True when an ongoing session for the same package was resumed
    /// instead of a new one created.
    pub resumed: bool,
}

/// DTO for saving an answer. Exactly one of the three fields must be set;
/// which one depends on the question type.
#[derive(Debug, Deserialize)]
pub struct SaveAnswerRequest {
    pub option_id: Option<i64>,
    pub option_ids: Option<Vec<i64>>,
    pub text: Option<String>,
}

/// DTO for flagging a question as erroneous during a session.
#[derive(Debug, Deserialize)]
pub struct ReportQuestionRequest {
    pub note: Option<String>,
}
