// src/handlers/exam.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    config::VIOLATION_LIMIT,
    error::AppError,
    models::{
        answer::ExamAnswer,
        package::Package,
        question::{PublicOption, PublicQuestion, Question},
        session::{
            ExamSession, ReportQuestionRequest, SaveAnswerRequest, SessionContext,
            StartExamResponse,
        },
    },
    scoring,
    utils::{
        jwt::Claims,
        session::{
            ExecutionMode, WindowCheck, check_window, generate_session_token, session_deadline,
        },
    },
};

/// Starts (or resumes) an exam session for a package.
///
/// Eligibility, in order: package exists and is active, the student is
/// enrolled in its program, today is inside the activity window, no
/// conflicting ongoing session, attempt quota not exhausted.
///
/// An ongoing session for the *same* package is resumed idempotently with
/// its existing credential. Session creation and the pre-seeding of one
/// answer row per question happen in a single transaction; the partial
/// unique index on ongoing sessions turns a lost creation race into a
/// Conflict instead of a second session.
pub async fn start_session(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(package_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let package = sqlx::query_as::<_, Package>("SELECT * FROM packages WHERE id = $1")
        .bind(package_id)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Package not found".to_string()))?;

    if !package.is_active {
        return Err(AppError::BadRequest("Package is not active".to_string()));
    }

    let enrolled = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM program_students WHERE program_id = $1 AND student_id = $2",
    )
    .bind(package.program_id)
    .bind(student_id)
    .fetch_one(&pool)
    .await?;

    if enrolled == 0 {
        return Err(AppError::Forbidden(
            "Not enrolled in this package's program".to_string(),
        ));
    }

    match check_window(package.start_date, package.end_date, Utc::now().date_naive()) {
        WindowCheck::NotYetOpen => {
            return Err(AppError::BadRequest("Package is not open yet".to_string()));
        }
        WindowCheck::Closed => {
            return Err(AppError::BadRequest("Package is closed".to_string()));
        }
        WindowCheck::Open => {}
    }

    // One ongoing session per student, across all packages. Same package
    // means resume; a different one is a conflict.
    let ongoing = sqlx::query_as::<_, ExamSession>(
        "SELECT * FROM exam_sessions WHERE student_id = $1 AND status = 'ongoing'",
    )
    .bind(student_id)
    .fetch_optional(&pool)
    .await?;

    if let Some(session) = ongoing {
        if session.package_id == package_id {
            return Ok((
                StatusCode::OK,
                Json(start_response(&package, &session, true)),
            ));
        }
        return Err(AppError::Conflict(
            "Another exam session is in progress".to_string(),
        ));
    }

    if let Some(max_attempts) = package.max_attempts {
        let attempts = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM exam_sessions
            WHERE student_id = $1 AND package_id = $2 AND status = 'completed'
            "#,
        )
        .bind(student_id)
        .bind(package_id)
        .fetch_one(&pool)
        .await?;

        if attempts >= max_attempts as i64 {
            return Err(AppError::Forbidden(
                "Attempt quota for this package is exhausted".to_string(),
            ));
        }
    }

    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, ExamSession>(
        r#"
        INSERT INTO exam_sessions (student_id, package_id, token, status)
        VALUES ($1, $2, $3, 'ongoing')
        RETURNING *
        "#,
    )
    .bind(student_id)
    .bind(package_id)
    .bind(generate_session_token())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique") || e.to_string().contains("23505") {
            // A concurrent start committed first.
            AppError::Conflict("Another exam session is in progress".to_string())
        } else {
            tracing::error!("Failed to create session: {:?}", e);
            AppError::from(e)
        }
    })?;

    // Pre-seed one answer row per question so "unanswered" is an explicit
    // row and scoring never has to diff against the question bank.
    sqlx::query(
        r#"
        INSERT INTO exam_answers (session_id, question_id)
        SELECT $1, id FROM questions WHERE package_id = $2
        "#,
    )
    .bind(session.id)
    .bind(package_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Session {} started for student {} on package {}",
        session.id,
        student_id,
        package_id
    );

    Ok((
        StatusCode::CREATED,
        Json(start_response(&package, &session, false)),
    ))
}

fn start_response(package: &Package, session: &ExamSession, resumed: bool) -> StartExamResponse {
    let mode = ExecutionMode::parse(&package.execution_mode);
    StartExamResponse {
        token: session.token.clone(),
        session_id: session.id,
        package_id: package.id,
        started_at: session.started_at,
        duration_minutes: package.duration_minutes,
        execution_mode: package.execution_mode.clone(),
        deadline: session_deadline(
            mode,
            session.started_at,
            package.duration_minutes,
            package.end_date,
        ),
        resumed,
    }
}

/// Helper struct for fetching options without the answer key columns.
#[derive(sqlx::FromRow)]
struct RedactedOption {
    id: i64,
    question_id: i64,
    content: String,
}

/// Returns the session's questions with their options and the student's
/// currently recorded answers.
///
/// Options are redacted: `is_correct` and `weight` never leave the server
/// while the session is ongoing. The review endpoint is the one place the
/// answer key is exposed, and only after completion.
pub async fn get_questions(
    State(pool): State<PgPool>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        "SELECT * FROM questions WHERE package_id = $1 ORDER BY order_index, id",
    )
    .bind(ctx.package_id)
    .fetch_all(&pool)
    .await?;

    let options = sqlx::query_as::<_, RedactedOption>(
        r#"
        SELECT o.id, o.question_id, o.content
        FROM question_options o
        JOIN questions q ON q.id = o.question_id
        WHERE q.package_id = $1
        ORDER BY o.id
        "#,
    )
    .bind(ctx.package_id)
    .fetch_all(&pool)
    .await?;

    let answers = sqlx::query_as::<_, ExamAnswer>(
        "SELECT * FROM exam_answers WHERE session_id = $1",
    )
    .bind(ctx.id)
    .fetch_all(&pool)
    .await?;

    let mut options_by_question: HashMap<i64, Vec<PublicOption>> = HashMap::new();
    for option in options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(PublicOption {
                id: option.id,
                content: option.content,
            });
    }

    let mut answers_by_question: HashMap<i64, ExamAnswer> =
        answers.into_iter().map(|a| (a.question_id, a)).collect();

    let payload: Vec<PublicQuestion> = questions
        .into_iter()
        .map(|q| {
            let answer = answers_by_question.remove(&q.id);
            PublicQuestion {
                id: q.id,
                category: q.category,
                question_type: q.question_type,
                point: q.point,
                content: q.content,
                options: options_by_question.remove(&q.id).unwrap_or_default(),
                selected_option_id: answer.as_ref().and_then(|a| a.selected_option_id),
                selected_option_ids: answer
                    .as_ref()
                    .and_then(|a| a.selected_option_ids.as_ref().map(|ids| ids.0.clone())),
                text_answer: answer.and_then(|a| a.text_answer),
            }
        })
        .collect();

    Ok(Json(payload))
}

/// Records (or overwrites) the answer to one question.
///
/// Idempotent last-write-wins: the pre-seeded row for (session, question)
/// is updated in place, whichever answer-shape field applies; the other
/// two are cleared. No correctness computation happens here.
pub async fn save_answer(
    State(pool): State<PgPool>,
    Extension(ctx): Extension<SessionContext>,
    Path(question_id): Path<i64>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let provided = payload.option_id.is_some() as u8
        + payload.option_ids.is_some() as u8
        + payload.text.is_some() as u8;
    if provided != 1 {
        return Err(AppError::BadRequest(
            "Provide exactly one of option_id, option_ids or text".to_string(),
        ));
    }

    let result = sqlx::query(
        r#"
        UPDATE exam_answers
        SET selected_option_id = $1,
            selected_option_ids = $2,
            text_answer = $3,
            answered_at = NOW()
        WHERE session_id = $4 AND question_id = $5
        "#,
    )
    .bind(payload.option_id)
    .bind(payload.option_ids.map(sqlx::types::Json))
    .bind(&payload.text)
    .bind(ctx.id)
    .bind(question_id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(
            "Question does not belong to this session".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({
        "question_id": question_id,
        "saved": true
    })))
}

/// Records one proctoring violation (a client-observed fullscreen exit).
///
/// Below the limit, returns the counter so the client can warn the
/// student. At the limit, the session is finalized immediately and the
/// response signals the forced auto-submission.
pub async fn report_violation(
    State(pool): State<PgPool>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let violations = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE exam_sessions
        SET violations = violations + 1
        WHERE id = $1 AND status = 'ongoing'
        RETURNING violations
        "#,
    )
    .bind(ctx.id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::Conflict("Session already completed".to_string()))?;

    if violations >= VIOLATION_LIMIT {
        tracing::warn!(
            "Session {} hit the violation limit, forcing finalize",
            ctx.id
        );
        let outcome = scoring::finalize(&pool, ctx.id).await?;
        return Ok(Json(serde_json::json!({
            "violations": violations,
            "limit": VIOLATION_LIMIT,
            "auto_submitted": true,
            "result_id": outcome.result.id
        })));
    }

    Ok(Json(serde_json::json!({
        "violations": violations,
        "limit": VIOLATION_LIMIT,
        "auto_submitted": false
    })))
}

/// Explicit submission: triggers the one-time finalize transition and
/// returns the result id for the client to redirect to the review screen.
/// A repeated submit observes the existing result instead of re-scoring.
pub async fn submit_exam(
    State(pool): State<PgPool>,
    Extension(ctx): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = scoring::finalize(&pool, ctx.id).await?;

    Ok(Json(serde_json::json!({
        "result_id": outcome.result.id,
        "total_score": outcome.result.total_score,
        "is_passed": outcome.result.is_passed,
        "already_completed": outcome.already_completed
    })))
}

/// Flags a question as erroneous during the session. The review endpoint
/// joins against these reports; the reporting workflow itself is handled
/// elsewhere.
pub async fn report_question(
    State(pool): State<PgPool>,
    Extension(ctx): Extension<SessionContext>,
    Path(question_id): Path<i64>,
    Json(payload): Json<ReportQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let belongs = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM questions WHERE id = $1 AND package_id = $2",
    )
    .bind(question_id)
    .bind(ctx.package_id)
    .fetch_one(&pool)
    .await?;

    if belongs == 0 {
        return Err(AppError::NotFound(
            "Question does not belong to this session".to_string(),
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO question_reports (student_id, question_id, note)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id, question_id) DO UPDATE SET note = EXCLUDED.note
        "#,
    )
    .bind(ctx.student_id)
    .bind(question_id)
    .bind(&payload.note)
    .execute(&pool)
    .await?;

    Ok(StatusCode::CREATED)
}
