// src/routes.rs

use std::sync::Arc;

use axum::{
    Router, http::Method, middleware,
    routing::{get, post, put},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, exam, packages, results},
    state::AppState,
    utils::{jwt::auth_middleware, session::exam_session_middleware},
};

/// Assembles the main application router.
///
/// * Auth routes are rate-limited.
/// * Exam routes require a bearer token; session-scoped exam routes
///   additionally pass the session guard, which validates the
///   X-Exam-Token header on every call.
/// * Applies global middleware (Trace, CORS) and injects the AppState.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-exam-token"),
        ]);

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(5)
        .finish()
        .unwrap();

    let governor_conf = Arc::new(governor_conf);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(GovernorLayer::new(governor_conf));

    // Session-scoped routes: bearer auth first, then the session guard.
    let session_routes = Router::new()
        .route("/questions", get(exam::get_questions))
        .route("/answers/{question_id}", put(exam::save_answer))
        .route("/questions/{question_id}/report", post(exam::report_question))
        .route("/violations", post(exam::report_violation))
        .route("/submit", post(exam::submit_exam))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            exam_session_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let exam_routes = Router::new()
        .route("/packages", get(packages::list_available_packages))
        .route("/packages/{id}/start", post(exam::start_session))
        .route("/results/{id}", get(results::get_review))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .merge(session_routes);

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/exam", exam_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
