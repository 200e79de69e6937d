// src/handlers/results.rs

use std::collections::{HashMap, HashSet};

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        answer::ExamAnswer,
        exam_result::{CategoryBreakdown, ExamResult, ReviewQuestion, ReviewResponse},
        package::Package,
        question::{Question, QuestionOption},
    },
    scoring::meets_threshold,
    utils::jwt::Claims,
};

/// Full review of a completed attempt, restricted to the owning student
/// (admins may read any result).
///
/// Combines the frozen result, the per-category breakdown against the
/// package thresholds, and a question-by-question view with the full
/// options — including the answer key, which is safe to expose here
/// because the session is over — the student's recorded answer, and
/// whether the student flagged the question as erroneous.
pub async fn get_review(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(result_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query_as::<_, ExamResult>("SELECT * FROM exam_results WHERE id = $1")
        .bind(result_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

    if result.student_id != claims.user_id() && claims.role != "admin" {
        return Err(AppError::Forbidden(
            "Result belongs to another student".to_string(),
        ));
    }

    let package = sqlx::query_as::<_, Package>("SELECT * FROM packages WHERE id = $1")
        .bind(result.package_id)
        .fetch_one(&pool)
        .await?;

    let categories = vec![
        category_breakdown("twk", result.score_twk, package.passing_grade_twk),
        category_breakdown("tiu", result.score_tiu, package.passing_grade_tiu),
        category_breakdown("tkp", result.score_tkp, package.passing_grade_tkp),
    ];

    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE package_id = $1 ORDER BY order_index, id",
    )
    .bind(result.package_id)
    .fetch_all(&pool)
    .await?;

    let options = sqlx::query_as::<_, QuestionOption>(
        r#"
        SELECT o.id, o.question_id, o.content, o.is_correct, o.weight
        FROM question_options o
        JOIN questions q ON q.id = o.question_id
        WHERE q.package_id = $1
        ORDER BY o.id
        "#,
    )
    .bind(result.package_id)
    .fetch_all(&pool)
    .await?;

    let answers = sqlx::query_as::<_, ExamAnswer>(
        "SELECT * FROM exam_answers WHERE session_id = $1",
    )
    .bind(result.session_id)
    .fetch_all(&pool)
    .await?;

    let reported: HashSet<i64> = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT r.question_id
        FROM question_reports r
        JOIN questions q ON q.id = r.question_id
        WHERE r.student_id = $1 AND q.package_id = $2
        "#,
    )
    .bind(result.student_id)
    .bind(result.package_id)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .collect();

    let mut options_by_question: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
    for option in options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option);
    }

    let mut answers_by_question: HashMap<i64, ExamAnswer> =
        answers.into_iter().map(|a| (a.question_id, a)).collect();

    let review_questions: Vec<ReviewQuestion> = questions
        .into_iter()
        .map(|q| {
            let answer = answers_by_question.remove(&q.id);
            let reported = reported.contains(&q.id);
            let options = options_by_question.remove(&q.id).unwrap_or_default();
            ReviewQuestion {
                selected_option_id: answer.as_ref().and_then(|a| a.selected_option_id),
                selected_option_ids: answer
                    .as_ref()
                    .and_then(|a| a.selected_option_ids.as_ref().map(|ids| ids.0.clone())),
                text_answer: answer.as_ref().and_then(|a| a.text_answer.clone()),
                is_correct: answer.as_ref().and_then(|a| a.is_correct),
                points_earned: answer.as_ref().and_then(|a| a.points_earned),
                question: q,
                options,
                reported,
            }
        })
        .collect();

    Ok(Json(ReviewResponse {
        package_name: package.name,
        passing_score: package.passing_score,
        result,
        categories,
        questions: review_questions,
    }))
}

fn category_breakdown(category: &str, score: f64, threshold: Option<f64>) -> CategoryBreakdown {
    CategoryBreakdown {
        category: category.to_string(),
        score,
        threshold: threshold.unwrap_or(0.0),
        passed: meets_threshold(score, threshold),
    }
}
