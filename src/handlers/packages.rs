// src/handlers/packages.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use sqlx::PgPool;

use crate::{error::AppError, models::package::AvailablePackage, utils::jwt::Claims};

/// Lists the packages the authenticated student may attempt right now:
/// active packages of the student's programs whose activity window
/// contains today, joined with the student's completed-attempt count and
/// whether they have an ongoing session for the package.
pub async fn list_available_packages(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id();

    let packages = sqlx::query_as::<_, AvailablePackage>(
        r#"
        SELECT
            p.id, p.program_id, p.name, p.duration_minutes,
            p.start_date, p.end_date, p.max_attempts, p.execution_mode,
            (SELECT COUNT(*) FROM exam_sessions s
              WHERE s.package_id = p.id
                AND s.student_id = $1
                AND s.status = 'completed') AS attempt_count,
            EXISTS (SELECT 1 FROM exam_sessions s
              WHERE s.package_id = p.id
                AND s.student_id = $1
                AND s.status = 'ongoing') AS has_ongoing_session
        FROM packages p
        JOIN programs pr ON pr.id = p.program_id
        JOIN program_students ps ON ps.program_id = pr.id
        WHERE ps.student_id = $1
          AND p.is_active
          AND pr.is_active
          AND (p.start_date IS NULL OR p.start_date <= CURRENT_DATE)
          AND (p.end_date IS NULL OR p.end_date >= CURRENT_DATE)
        ORDER BY p.id
        "#,
    )
    .bind(student_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list packages: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(packages))
}
