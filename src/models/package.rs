// src/models/package.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'packages' table: a named, timed assessment definition.
///
/// Authored by the administrative workflow; the exam engine only reads it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,
    pub program_id: i64,
    pub name: String,

    /// Time allowed for one attempt, in minutes.
    pub duration_minutes: i32,

    /// Global pass threshold for the total score.
    pub passing_score: f64,

    /// Per-category pass thresholds. NULL (or <= 0) means the category
    /// imposes no requirement.
    pub passing_grade_twk: Option<f64>,
    pub passing_grade_tiu: Option<f64>,
    pub passing_grade_tkp: Option<f64>,

    /// Activity window, inclusive on both days. NULL means unbounded.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    /// Maximum completed attempts per student. NULL means unlimited.
    pub max_attempts: Option<i32>,

    /// 'flexible': each student's window is start + duration.
    /// 'live': a shared wall-clock window bounded by end_date.
    pub execution_mode: String,

    pub is_active: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A package as listed to a student, with their attempt state joined in.
#[derive(Debug, Serialize, FromRow)]
pub struct AvailablePackage {
    pub id: i64,
    pub program_id: i64,
    pub name: String,
    pub duration_minutes: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_attempts: Option<i32>,
    pub execution_mode: String,

    /// The student's completed attempts for this package.
    pub attempt_count: i64,

    /// Whether the student currently has an ongoing session for this package.
    pub has_ongoing_session: bool,
}
