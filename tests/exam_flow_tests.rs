// tests/exam_flow_tests.rs
//
// End-to-end exam flow tests against a running Postgres instance.
// Each test spawns its own app on a random port and seeds its own
// program/package/student, so tests are independent and can run in
// parallel. Skipped (with a note) when DATABASE_URL is not set.

use cbt_engine::{config::Config, routes, state::AppState};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;

struct TestApp {
    address: String,
    pool: PgPool,
}

/// Helper function to spawn the app on a random port for testing.
/// Returns None when DATABASE_URL is not configured.
async fn spawn_app() -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };

    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Some(TestApp { address, pool })
}

/// Registers and logs in a fresh student; returns (user_id, bearer token).
async fn register_student(app: &TestApp, client: &reqwest::Client) -> (i64, String) {
    let username = format!("s_{}", &uuid::Uuid::new_v4().to_string()[..12]);
    let password = "password123";

    let register_resp = client
        .post(format!("{}/api/auth/register", app.address))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Register failed");
    assert_eq!(register_resp.status().as_u16(), 201);
    let user: serde_json::Value = register_resp.json().await.unwrap();
    let user_id = user["id"].as_i64().unwrap();

    let login_resp: serde_json::Value = client
        .post(format!("{}/api/auth/login", app.address))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Login failed")
        .json()
        .await
        .expect("Failed to parse login json");

    (user_id, login_resp["token"].as_str().unwrap().to_string())
}

/// Seeds a program with the student enrolled and one package in it.
/// Returns the package id.
async fn seed_package(
    pool: &PgPool,
    student_id: i64,
    max_attempts: Option<i32>,
    passing_score: f64,
    passing_grade_twk: Option<f64>,
) -> i64 {
    let program_id: i64 =
        sqlx::query_scalar("INSERT INTO programs (name) VALUES ('CPNS Tryout') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();

    sqlx::query("INSERT INTO program_students (program_id, student_id) VALUES ($1, $2)")
        .bind(program_id)
        .bind(student_id)
        .execute(pool)
        .await
        .unwrap();

    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO packages
            (program_id, name, duration_minutes, passing_score, passing_grade_twk, max_attempts)
        VALUES ($1, 'Paket 1', 60, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(program_id)
    .bind(passing_score)
    .bind(passing_grade_twk)
    .bind(max_attempts)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Seeds one question with options. `options` is (content, is_correct, weight).
async fn seed_question(
    pool: &PgPool,
    package_id: i64,
    category: &str,
    question_type: &str,
    point: f64,
    options: &[(&str, bool, Option<f64>)],
) -> (i64, Vec<i64>) {
    let question_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO questions (package_id, category, question_type, point, order_index, content)
        VALUES ($1, $2, $3, $4, 0, 'Question?')
        RETURNING id
        "#,
    )
    .bind(package_id)
    .bind(category)
    .bind(question_type)
    .bind(point)
    .fetch_one(pool)
    .await
    .unwrap();

    let mut option_ids = Vec::new();
    for (content, is_correct, weight) in options {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO question_options (question_id, content, is_correct, weight)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(question_id)
        .bind(content)
        .bind(is_correct)
        .bind(weight)
        .fetch_one(pool)
        .await
        .unwrap();
        option_ids.push(id);
    }

    (question_id, option_ids)
}

async fn start_session(
    app: &TestApp,
    client: &reqwest::Client,
    token: &str,
    package_id: i64,
) -> reqwest::Response {
    client
        .post(format!("{}/api/exam/packages/{}/start", app.address, package_id))
        .bearer_auth(token)
        .send()
        .await
        .expect("Start request failed")
}

#[tokio::test]
async fn start_resumes_same_package_and_conflicts_on_other() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_a = seed_package(&app.pool, student_id, None, 0.0, None).await;
    let package_b = seed_package(&app.pool, student_id, None, 0.0, None).await;

    let first: serde_json::Value = start_session(&app, &client, &token, package_a)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = first["token"].as_str().unwrap().to_string();
    assert_eq!(first["resumed"], false);

    // Starting a different package while one is ongoing is a conflict.
    let conflict = start_session(&app, &client, &token, package_b).await;
    assert_eq!(conflict.status().as_u16(), 409);

    // Starting the same package resumes with the same credential.
    let resumed: serde_json::Value = start_session(&app, &client, &token, package_a)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(resumed["resumed"], true);
    assert_eq!(resumed["token"].as_str().unwrap(), exam_token);
}

#[tokio::test]
async fn attempt_quota_is_enforced() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, Some(1), 0.0, None).await;
    seed_question(&app.pool, package_id, "twk", "single", 5.0, &[("A", true, None)]).await;

    // First attempt: start and submit.
    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap();

    let submit = client
        .post(format!("{}/api/exam/submit", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", exam_token)
        .send()
        .await
        .unwrap();
    assert_eq!(submit.status().as_u16(), 200);

    // Second attempt: quota of 1 is exhausted.
    let denied = start_session(&app, &client, &token, package_id).await;
    assert_eq!(denied.status().as_u16(), 403);
}

#[tokio::test]
async fn answers_overwrite_in_place() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    let (question_id, option_ids) = seed_question(
        &app.pool,
        package_id,
        "tiu",
        "single",
        5.0,
        &[("A", true, None), ("B", false, None)],
    )
    .await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap().to_string();
    let session_id = start["session_id"].as_i64().unwrap();

    for option_id in [option_ids[0], option_ids[1]] {
        let resp = client
            .put(format!("{}/api/exam/answers/{}", app.address, question_id))
            .bearer_auth(&token)
            .header("X-Exam-Token", &exam_token)
            .json(&serde_json::json!({ "option_id": option_id }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
    }

    // Exactly one pre-seeded row, holding the latest value.
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT selected_option_id FROM exam_answers WHERE session_id = $1 AND question_id = $2",
    )
    .bind(session_id)
    .bind(question_id)
    .fetch_all(&app.pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, option_ids[1]);
}

#[tokio::test]
async fn saving_unknown_question_is_not_found() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    seed_question(&app.pool, package_id, "twk", "single", 5.0, &[("A", true, None)]).await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();

    let resp = client
        .put(format!("{}/api/exam/answers/999999999", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", start["token"].as_str().unwrap())
        .json(&serde_json::json!({ "option_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn questions_are_redacted_during_session() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    seed_question(
        &app.pool,
        package_id,
        "tkp",
        "weighted",
        5.0,
        &[("A", false, Some(2.0)), ("B", false, Some(5.0))],
    )
    .await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();

    let questions: serde_json::Value = client
        .get(format!("{}/api/exam/questions", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", start["token"].as_str().unwrap())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let options = questions[0]["options"].as_array().unwrap();
    assert!(!options.is_empty());
    for option in options {
        assert!(option.get("is_correct").is_none());
        assert!(option.get("weight").is_none());
    }
}

#[tokio::test]
async fn submit_is_idempotent() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    seed_question(&app.pool, package_id, "twk", "single", 5.0, &[("A", true, None)]).await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap().to_string();
    let session_id = start["session_id"].as_i64().unwrap();

    let first: serde_json::Value = client
        .post(format!("{}/api/exam/submit", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", &exam_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["already_completed"], false);

    // The guard rejects the completed session's token, so the idempotent
    // path is observable directly through finalize-level state: exactly
    // one result row exists for the session.
    let second = client
        .post(format!("{}/api/exam/submit", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", &exam_token)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 401);

    let result_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exam_results WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(result_count, 1);
}

#[tokio::test]
async fn violation_threshold_forces_submission() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    seed_question(&app.pool, package_id, "twk", "single", 5.0, &[("A", true, None)]).await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap().to_string();
    let session_id = start["session_id"].as_i64().unwrap();

    let report = |client: &reqwest::Client| {
        client
            .post(format!("{}/api/exam/violations", app.address))
            .bearer_auth(&token)
            .header("X-Exam-Token", &exam_token)
            .send()
    };

    let first: serde_json::Value = report(&client).await.unwrap().json().await.unwrap();
    assert_eq!(first["violations"], 1);
    assert_eq!(first["auto_submitted"], false);

    let second: serde_json::Value = report(&client).await.unwrap().json().await.unwrap();
    assert_eq!(second["violations"], 2);
    assert_eq!(second["auto_submitted"], true);

    let result_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exam_results WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(result_count, 1);
}

#[tokio::test]
async fn expired_session_is_force_finalized() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    let package_id = seed_package(&app.pool, student_id, None, 0.0, None).await;
    seed_question(&app.pool, package_id, "twk", "single", 5.0, &[("A", true, None)]).await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap().to_string();
    let session_id = start["session_id"].as_i64().unwrap();

    // Backdate the session past its 60 minute duration plus grace.
    sqlx::query("UPDATE exam_sessions SET started_at = NOW() - INTERVAL '62 minutes' WHERE id = $1")
        .bind(session_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/api/exam/questions", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", &exam_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 408);

    // The timeout carried a forced finalize: the partial work was scored.
    let result_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exam_results WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert_eq!(result_count, 1);
}

#[tokio::test]
async fn full_flow_scores_and_reviews() {
    let Some(app) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let (student_id, token) = register_student(&app, &client).await;

    // passing_score 15 and twk threshold 10: the answers below earn
    // total 14.5 with twk 5, so the attempt fails on both dimensions.
    let package_id = seed_package(&app.pool, student_id, None, 15.0, Some(10.0)).await;

    let (q_single, single_opts) = seed_question(
        &app.pool,
        package_id,
        "twk",
        "single",
        5.0,
        &[("A", true, None), ("B", false, None)],
    )
    .await;
    let (q_multi, multi_opts) = seed_question(
        &app.pool,
        package_id,
        "tiu",
        "multiple",
        5.0,
        &[("A", true, None), ("B", true, None), ("C", false, None)],
    )
    .await;
    let (q_weighted, weighted_opts) = seed_question(
        &app.pool,
        package_id,
        "tkp",
        "weighted",
        5.0,
        &[("A", false, Some(2.0)), ("B", false, Some(5.0))],
    )
    .await;
    let (q_short, _) = seed_question(
        &app.pool,
        package_id,
        "general",
        "short",
        5.0,
        &[("soekarno", true, None)],
    )
    .await;

    let start: serde_json::Value = start_session(&app, &client, &token, package_id)
        .await
        .json()
        .await
        .unwrap();
    let exam_token = start["token"].as_str().unwrap().to_string();

    let save = |path_id: i64, body: serde_json::Value| {
        client
            .put(format!("{}/api/exam/answers/{}", app.address, path_id))
            .bearer_auth(&token)
            .header("X-Exam-Token", &exam_token)
            .json(&body)
            .send()
    };

    // single: correct (5.0 twk)
    save(q_single, serde_json::json!({ "option_id": single_opts[0] }))
        .await
        .unwrap();
    // multiple: 1 of 2 correct options (2.5 tiu, not correct)
    save(q_multi, serde_json::json!({ "option_ids": [multi_opts[0]] }))
        .await
        .unwrap();
    // weighted: lower-weight option (2.0 tkp, not correct)
    save(q_weighted, serde_json::json!({ "option_id": weighted_opts[0] }))
        .await
        .unwrap();
    // short: matches case-insensitively with surrounding whitespace (5.0)
    save(q_short, serde_json::json!({ "text": "  Soekarno " }))
        .await
        .unwrap();

    let submit: serde_json::Value = client
        .post(format!("{}/api/exam/submit", app.address))
        .bearer_auth(&token)
        .header("X-Exam-Token", &exam_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(submit["total_score"].as_f64().unwrap(), 14.5);
    assert_eq!(submit["is_passed"], false);
    let result_id = submit["result_id"].as_i64().unwrap();

    let review: serde_json::Value = client
        .get(format!("{}/api/exam/results/{}", app.address, result_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(review["result"]["score_twk"].as_f64().unwrap(), 5.0);
    assert_eq!(review["result"]["score_tiu"].as_f64().unwrap(), 2.5);
    assert_eq!(review["result"]["score_tkp"].as_f64().unwrap(), 2.0);
    assert_eq!(review["result"]["answered_count"], 4);
    assert_eq!(review["result"]["correct_count"], 2);

    let twk = review["categories"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["category"] == "twk")
        .unwrap();
    assert_eq!(twk["passed"], false);
    assert_eq!(twk["threshold"].as_f64().unwrap(), 10.0);

    // The review exposes the answer key; the in-session payload does not.
    let first_question = &review["questions"][0];
    assert!(first_question["options"][0].get("is_correct").is_some());

    // Another student must not read this result.
    let (_, other_token) = register_student(&app, &client).await;
    let denied = client
        .get(format!("{}/api/exam/results/{}", app.address, result_id))
        .bearer_auth(&other_token)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);
}
