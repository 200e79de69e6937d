// src/utils/session.rs

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    config::FLEXIBLE_GRACE_SECONDS,
    error::AppError,
    models::session::SessionContext,
    scoring,
    state::AppState,
    utils::jwt::Claims,
};

/// Header carrying the exam-session credential, separate from the
/// Authorization header so a stolen auth token alone cannot drive an exam.
pub const EXAM_TOKEN_HEADER: &str = "x-exam-token";

/// Generates the opaque session credential issued at session start.
pub fn generate_session_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// How a package executes its timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Each student's window is their own start + duration.
    Flexible,
    /// A shared wall-clock window for all students, bounded by end_date.
    Live,
}

impl ExecutionMode {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "live" => ExecutionMode::Live,
            _ => ExecutionMode::Flexible,
        }
    }
}

/// Result of checking a package's activity window against today's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    Open,
    NotYetOpen,
    Closed,
}

/// Checks the activity window with inclusive-day semantics on both ends.
pub fn check_window(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    today: NaiveDate,
) -> WindowCheck {
    if start_date.is_some_and(|start| today < start) {
        return WindowCheck::NotYetOpen;
    }
    if end_date.is_some_and(|end| today > end) {
        return WindowCheck::Closed;
    }
    WindowCheck::Open
}

/// The last instant of an inclusive end day.
fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc())
}

/// The deadline advertised to the client for its countdown.
///
/// Flexible sessions end at start + duration; live sessions end with the
/// package's shared window. The grace buffer is deliberately excluded here
/// and only applied by the expiry check.
pub fn session_deadline(
    mode: ExecutionMode,
    started_at: DateTime<Utc>,
    duration_minutes: i32,
    end_date: Option<NaiveDate>,
) -> Option<DateTime<Utc>> {
    match mode {
        ExecutionMode::Flexible => {
            Some(started_at + Duration::minutes(duration_minutes as i64))
        }
        ExecutionMode::Live => end_date.and_then(end_of_day),
    }
}

/// Whether a session's time is up at `now`.
pub fn is_expired(
    mode: ExecutionMode,
    started_at: DateTime<Utc>,
    duration_minutes: i32,
    end_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> bool {
    match mode {
        ExecutionMode::Flexible => {
            let deadline = started_at
                + Duration::minutes(duration_minutes as i64)
                + Duration::seconds(FLEXIBLE_GRACE_SECONDS);
            now > deadline
        }
        ExecutionMode::Live => match end_date.and_then(end_of_day) {
            Some(end) => now > end,
            None => false,
        },
    }
}

/// Axum Middleware: Session Guard.
///
/// Applied to every session-scoped route, after `auth_middleware`.
///
/// * Resolves the X-Exam-Token header to an ongoing session.
/// * Verifies the session belongs to the authenticated student.
/// * Checks time validity by execution mode; on expiry, force-finalizes
///   the session (scoring runs, partial work is kept) and returns 408.
/// * On success, injects the validated `SessionContext` into the request
///   extensions so handlers need no second lookup.
pub async fn exam_session_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))?;

    let token = req
        .headers()
        .get(EXAM_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::AuthError("Missing exam token".to_string()))?;

    let ctx = sqlx::query_as::<_, SessionContext>(
        r#"
        SELECT
            s.id, s.student_id, s.package_id, s.violations, s.started_at,
            p.execution_mode, p.duration_minutes, p.end_date
        FROM exam_sessions s
        JOIN packages p ON p.id = s.package_id
        WHERE s.token = $1 AND s.status = 'ongoing'
        "#,
    )
    .bind(token)
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to resolve exam token: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?
    .ok_or_else(|| AppError::AuthError("Invalid or expired exam token".to_string()))?;

    if ctx.student_id != claims.user_id() {
        return Err(AppError::Forbidden(
            "Session belongs to another student".to_string(),
        ));
    }

    let mode = ExecutionMode::parse(&ctx.execution_mode);
    if is_expired(
        mode,
        ctx.started_at,
        ctx.duration_minutes,
        ctx.end_date,
        Utc::now(),
    ) {
        tracing::info!("Session {} expired, forcing finalize", ctx.id);
        scoring::finalize(&state.pool, ctx.id).await?;
        return Err(AppError::Timeout(
            "Exam time is over. The attempt was submitted automatically.".to_string(),
        ));
    }

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_open_inclusive_days() {
        let start = Some(date(2025, 3, 1));
        let end = Some(date(2025, 3, 10));

        assert_eq!(check_window(start, end, date(2025, 3, 1)), WindowCheck::Open);
        assert_eq!(check_window(start, end, date(2025, 3, 10)), WindowCheck::Open);
        assert_eq!(
            check_window(start, end, date(2025, 2, 28)),
            WindowCheck::NotYetOpen
        );
        assert_eq!(
            check_window(start, end, date(2025, 3, 11)),
            WindowCheck::Closed
        );
    }

    #[test]
    fn test_window_unbounded() {
        assert_eq!(check_window(None, None, date(2025, 1, 1)), WindowCheck::Open);
        assert_eq!(
            check_window(Some(date(2025, 1, 1)), None, date(2030, 1, 1)),
            WindowCheck::Open
        );
    }

    #[test]
    fn test_flexible_expiry_respects_grace() {
        let start = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();

        // 60 minute session, checked at T+60m+29s: within grace
        let inside = start + Duration::minutes(60) + Duration::seconds(29);
        assert!(!is_expired(ExecutionMode::Flexible, start, 60, None, inside));

        // T+61m+31s: past the 30s grace
        let outside = start + Duration::minutes(61) + Duration::seconds(31);
        assert!(is_expired(ExecutionMode::Flexible, start, 60, None, outside));
    }

    #[test]
    fn test_live_expiry_is_end_of_day() {
        let start = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let end = Some(date(2025, 3, 5));

        let before = Utc.with_ymd_and_hms(2025, 3, 5, 23, 59, 58).unwrap();
        assert!(!is_expired(ExecutionMode::Live, start, 60, end, before));

        let after = Utc.with_ymd_and_hms(2025, 3, 6, 0, 0, 1).unwrap();
        assert!(is_expired(ExecutionMode::Live, start, 60, end, after));
    }

    #[test]
    fn test_live_without_end_never_expires() {
        let start = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let much_later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(!is_expired(ExecutionMode::Live, start, 60, None, much_later));
    }

    #[test]
    fn test_deadline_excludes_grace() {
        let start = Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap();
        let deadline = session_deadline(ExecutionMode::Flexible, start, 90, None).unwrap();
        assert_eq!(deadline, start + Duration::minutes(90));
    }

    #[test]
    fn test_tokens_are_unique_and_opaque() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
