// src/scoring.rs

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow, types::Json};

use crate::{
    error::AppError,
    models::{exam_result::ExamResult, package::Package, question::QuestionOption},
};

/// Tolerance for comparing accumulated floating-point scores.
const SCORE_EPSILON: f64 = 1e-9;

/// Outcome of `finalize`. `already_completed` is true when a concurrent
/// or earlier caller won the terminal transition and this call merely
/// observed the existing result.
#[derive(Debug)]
pub struct FinalizeOutcome {
    pub result: ExamResult,
    pub already_completed: bool,
}

/// One answer row joined to its question, as the engine scores it.
#[derive(Debug, FromRow)]
struct ScoringRow {
    id: i64,
    question_id: i64,
    selected_option_id: Option<i64>,
    selected_option_ids: Option<Json<Vec<i64>>>,
    text_answer: Option<String>,
    question_type: String,
    category: String,
    point: f64,
}

impl ScoringRow {
    fn is_answered(&self) -> bool {
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

/// Computes `(is_correct, points_earned)` for one question.
///
/// Never fails: any answer shape the question type cannot interpret
/// (e.g. a text answer on a weighted question) scores as unanswered,
/// `(false, 0.0)`.
pub fn score_question(
    question_type: &str,
    point: f64,
    options: &[QuestionOption],
    selected_option_id: Option<i64>,
    selected_option_ids: Option<&[i64]>,
    text_answer: Option<&str>,
) -> (bool, f64) {
    match question_type {
        "single" => {
            let Some(selected) = selected_option_id else {
                return (false, 0.0);
            };
            let correct = options
                .iter()
                .find(|o| o.id == selected)
                .is_some_and(|o| o.is_correct);
            if correct { (true, point) } else { (false, 0.0) }
        }
        "weighted" => {
            let Some(selected) = selected_option_id else {
                return (false, 0.0);
            };
            let max_weight = options
                .iter()
                .filter_map(|o| o.weight)
                .fold(0.0_f64, f64::max);
            let weight = options
                .iter()
                .find(|o| o.id == selected)
                .and_then(|o| o.weight)
                .unwrap_or(0.0);
            // Best-weighted option counts as the correct one.
            (weight >= max_weight, weight)
        }
        "multiple" => {
            let correct_ids: HashSet<i64> = options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.id)
                .collect();
            if correct_ids.is_empty() {
                return (false, 0.0);
            }
            let Some(selected) = selected_option_ids else {
                return (false, 0.0);
            };
            let selected_ids: HashSet<i64> = selected.iter().copied().collect();
            let hits = selected_ids.intersection(&correct_ids).count();
            let per_item = point / correct_ids.len() as f64;
            let points = (hits as f64 * per_item).min(point);
            // Full credit only; partial credit is awarded but not "correct".
            (points >= point - SCORE_EPSILON, points)
        }
        "short" => {
            let Some(text) = text_answer else {
                return (false, 0.0);
            };
            let Some(key) = options.iter().find(|o| o.is_correct) else {
                return (false, 0.0);
            };
            if text.trim().to_lowercase() == key.content.trim().to_lowercase() {
                (true, point)
            } else {
                (false, 0.0)
            }
        }
        _ => (false, 0.0),
    }
}

/// Whether a category subtotal satisfies its package threshold.
/// An absent or non-positive threshold is always satisfied.
pub fn meets_threshold(score: f64, threshold: Option<f64>) -> bool {
    match threshold {
        Some(t) if t > 0.0 => score >= t,
        _ => true,
    }
}

/// Conjunctive pass/fail: the total and every tracked category must each
/// meet their threshold. A single failing dimension fails the attempt.
pub fn evaluate_pass(package: &Package, total: f64, twk: f64, tiu: f64, tkp: f64) -> bool {
    total >= package.passing_score
        && meets_threshold(twk, package.passing_grade_twk)
        && meets_threshold(tiu, package.passing_grade_tiu)
        && meets_threshold(tkp, package.passing_grade_tkp)
}

/// The one-time terminal transition of a session: ongoing -> completed.
///
/// Called from all three triggers (explicit submit, the guard's expiry
/// check, the proctoring threshold). Runs a single transaction:
///
/// 1. Atomic check-and-set of the session status. Losing a race here is
///    not an error: the existing result is returned idempotently.
/// 2. Scores every pre-seeded answer row and writes the computed
///    `(is_correct, points_earned)` back.
/// 3. Accumulates the total and tracked-category subtotals, evaluates
///    pass/fail, inserts the immutable result row.
/// 4. Refreshes the student's denormalized last_score.
pub async fn finalize(pool: &PgPool, session_id: i64) -> Result<FinalizeOutcome, AppError> {
    let mut tx = pool.begin().await?;

    let transition: Option<(i64, i64, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        UPDATE exam_sessions
        SET status = 'completed', ended_at = NOW()
        WHERE id = $1 AND status = 'ongoing'
        RETURNING student_id, package_id, started_at, ended_at
        "#,
    )
    .bind(session_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((student_id, package_id, started_at, ended_at)) = transition else {
        // Someone else already completed this session. A concurrent
        // finalizer holds the row lock until its commit, so once the
        // update above reports zero rows, the result row is visible.
        drop(tx);
        let existing = sqlx::query_as::<_, ExamResult>(
            "SELECT * FROM exam_results WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        return Ok(FinalizeOutcome {
            result: existing,
            already_completed: true,
        });
    };

    let package = sqlx::query_as::<_, Package>("SELECT * FROM packages WHERE id = $1")
        .bind(package_id)
        .fetch_one(&mut *tx)
        .await?;

    let rows: Vec<ScoringRow> = sqlx::query_as(
        r#"
        SELECT
            a.id, a.question_id, a.selected_option_id, a.selected_option_ids,
            a.text_answer, q.question_type, q.category, q.point
        FROM exam_answers a
        JOIN questions q ON q.id = a.question_id
        WHERE a.session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut *tx)
    .await?;

    let all_options: Vec<QuestionOption> = sqlx::query_as(
        r#"
        SELECT o.id, o.question_id, o.content, o.is_correct, o.weight
        FROM question_options o
        JOIN questions q ON q.id = o.question_id
        WHERE q.package_id = $1
        "#,
    )
    .bind(package_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut options_by_question: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
    for option in all_options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option);
    }

    let mut total_score = 0.0;
    let mut score_twk = 0.0;
    let mut score_tiu = 0.0;
    let mut score_tkp = 0.0;
    let mut answered_count = 0;
    let mut correct_count = 0;

    for row in &rows {
        let options = options_by_question
            .get(&row.question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let (is_correct, points) = score_question(
            &row.question_type,
            row.point,
            options,
            row.selected_option_id,
            row.selected_option_ids.as_ref().map(|ids| ids.0.as_slice()),
            row.text_answer.as_deref(),
        );

        sqlx::query("UPDATE exam_answers SET is_correct = $1, points_earned = $2 WHERE id = $3")
            .bind(is_correct)
            .bind(points)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        total_score += points;
        match row.category.as_str() {
            "twk" => score_twk += points,
            "tiu" => score_tiu += points,
            "tkp" => score_tkp += points,
            _ => {}
        }
        if row.is_answered() {
            answered_count += 1;
        }
        if is_correct {
            correct_count += 1;
        }
    }

    let is_passed = evaluate_pass(&package, total_score, score_twk, score_tiu, score_tkp);

    // Clock skew can produce a negative interval; results store the
    // absolute duration.
    let duration_seconds = (ended_at - started_at).num_seconds().abs();

    let result = sqlx::query_as::<_, ExamResult>(
        r#"
        INSERT INTO exam_results
            (session_id, student_id, package_id, total_questions, answered_count,
             correct_count, total_score, score_twk, score_tiu, score_tkp,
             is_passed, duration_seconds)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(session_id)
    .bind(student_id)
    .bind(package_id)
    .bind(rows.len() as i32)
    .bind(answered_count)
    .bind(correct_count)
    .bind(total_score)
    .bind(score_twk)
    .bind(score_tiu)
    .bind(score_tkp)
    .bind(is_passed)
    .bind(duration_seconds)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET last_score = $1 WHERE id = $2")
        .bind(total_score)
        .bind(student_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        "Session {} finalized: score {:.2}, passed {}",
        session_id,
        total_score,
        is_passed
    );

    Ok(FinalizeOutcome {
        result,
        already_completed: false,
    })
}
