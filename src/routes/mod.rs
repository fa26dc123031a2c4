//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); tighten for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Policy & allocation
        .route("/api/v1/experience/policy", get(http::http_experience_policy))
        .route("/api/v1/allocation/skills", post(http::http_allocate_skills))
        // Assessments
        .route("/api/v1/assessments", post(http::http_create_assessment))
        .route(
            "/api/v1/assessments/:id",
            get(http::http_get_assessment).put(http::http_update_assessment),
        )
        .route("/api/v1/assessments/:id/plan", get(http::http_assessment_plan))
        // Question bank
        .route("/api/v1/question-sets", post(http::http_create_question_set))
        .route("/api/v1/question-sets/:id/questions", get(http::http_list_set_questions))
        .route("/api/v1/questions", post(http::http_add_question))
        .route("/api/v1/questions/:id/publish", post(http::http_publish_question))
        // Generation jobs
        .route("/api/v1/generation/jobs", post(http::http_start_generation))
        .route("/api/v1/generation/jobs/:id", get(http::http_generation_status))
        // Test sessions
        .route("/api/v1/sessions", post(http::http_start_session))
        .route("/api/v1/sessions/:id", get(http::http_session_status))
        .route("/api/v1/sessions/:id/questions", get(http::http_session_questions))
        .route("/api/v1/sessions/:id/answers", post(http::http_submit_answers))
        .route("/api/v1/sessions/:id/complete", post(http::http_complete_session))
        .route("/api/v1/sessions/:id/submit", post(http::http_submit_and_complete))
        .route("/api/v1/sessions/:id/results", get(http::http_session_results))
        .route("/api/v1/sessions/:id/release", post(http::http_release_session))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::ReleasePolicy;
    use crate::jobs::TokioExecutor;
    use crate::openai::StubModel;
    use crate::retrieval::NoRetriever;
    use crate::seeds::{seed_demo_content, DEMO_QUESTION_SET_ID};
    use crate::store::MemoryStore;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app(policy: ReleasePolicy) -> Router {
        let mut config = EngineConfig::default();
        config.release.policy = policy;
        let state = AppState::build(
            MemoryStore::shared(),
            Arc::new(StubModel),
            Arc::new(NoRetriever),
            Arc::new(TokioExecutor),
            config,
            false,
        );
        seed_demo_content(&state.store).await.unwrap();
        build_router(Arc::new(state))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn start_demo_session(app: &Router) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/sessions",
            Some(json!({"question_set_id": DEMO_QUESTION_SET_ID, "name": "Guest", "email": "guest@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["total_questions"], json!(4));
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_collaborators() {
        let app = app(ReleasePolicy::Immediate).await;
        let (status, body) = call(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "model": "stub", "retrieval": false}));
    }

    #[tokio::test]
    async fn experience_policy_endpoint() {
        let app = app(ReleasePolicy::Immediate).await;
        let (status, body) = call(&app, Method::GET, "/api/v1/experience/policy?experience=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["label"], json!("junior"));
        assert_eq!(body["passing_threshold"], json!(60));
    }

    #[tokio::test]
    async fn empty_skill_list_is_a_bad_request() {
        let app = app(ReleasePolicy::Immediate).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/allocation/skills", Some(json!({"total": 5, "skills": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!(400));
    }

    #[tokio::test]
    async fn immediate_flow_end_to_end() {
        let app = app(ReleasePolicy::Immediate).await;
        let sid = start_demo_session(&app).await;

        let (status, questions) = call(&app, Method::GET, &format!("/api/v1/sessions/{sid}/questions"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!questions.to_string().contains("correct_answer"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/sessions/{sid}/answers"),
            Some(json!({"question_id": "demo-backend-q1", "selected_answer": "Z"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not an option"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/v1/sessions/{sid}/answers"),
            Some(json!({"answers": [
                {"question_id": "demo-backend-q1", "selected_answer": "C"},
                {"question_id": "demo-backend-q2", "selected_answer": "NOT_ANSWERED"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], json!(2));

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/v1/sessions/{sid}/answers"),
            Some(json!({"question_id": "demo-backend-q1", "selected_answer": "A"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, done) = call(&app, Method::POST, &format!("/api/v1/sessions/{sid}/complete"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["score_percentage"], json!(25.0));

        let (status, _) = call(&app, Method::POST, &format!("/api/v1/sessions/{sid}/complete"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, results) = call(&app, Method::GET, &format!("/api/v1/sessions/{sid}/results"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(results["status"], json!("scored"));
        assert_eq!(results["correct_answers"], json!(1));
        assert_eq!(results["questions"].as_array().unwrap().len(), 4);
        assert_eq!(results["remediation"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delayed_results_are_accepted_but_pending() {
        let app = app(ReleasePolicy::Delayed).await;
        let sid = start_demo_session(&app).await;

        let (status, view) = call(
            &app,
            Method::POST,
            &format!("/api/v1/sessions/{sid}/submit"),
            Some(json!({"answers": [{"question_id": "demo-backend-q1", "selected_answer": "C"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(view["status"], json!("processing"));
        assert!(view.get("score_percentage").is_none());
        assert!(view["estimated_release_at"].is_string());

        let (status, released) = call(&app, Method::POST, &format!("/api/v1/sessions/{sid}/release"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(released["is_scored"], json!(true));

        let (status, results) = call(&app, Method::GET, &format!("/api/v1/sessions/{sid}/results"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(results["score_percentage"], json!(25.0));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = app(ReleasePolicy::Immediate).await;
        let (status, body) = call(&app, Method::GET, "/api/v1/sessions/missing/results", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!(404));
    }

    #[tokio::test]
    async fn generation_job_runs_to_success() {
        let app = app(ReleasePolicy::Immediate).await;
        let (status, job) = call(
            &app,
            Method::POST,
            "/api/v1/generation/jobs",
            Some(json!({"topic": "http", "count": 2, "mode": "mix", "rag_pct": 50, "question_set_id": DEMO_QUESTION_SET_ID})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(job["status"], json!("PENDING"));
        let task_id = job["task_id"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..50 {
            let (status, body) = call(&app, Method::GET, &format!("/api/v1/generation/jobs/{task_id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            last = body;
            if last["status"] == json!("SUCCESS") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], json!("SUCCESS"));
        assert_eq!(last["result"]["created"].as_array().unwrap().len(), 2);
        assert_eq!(last["result"]["fallbacks"], json!(1));

        let (_, by_topic) = call(&app, Method::GET, "/api/v1/generation/jobs/http", None).await;
        assert_eq!(by_topic["task_id"], json!(task_id));

        let (_, questions) = call(&app, Method::GET, &format!("/api/v1/question-sets/{DEMO_QUESTION_SET_ID}/questions"), None).await;
        assert_eq!(questions.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn assessment_endpoints_validate_and_plan() {
        let app = app(ReleasePolicy::Immediate).await;
        let bad = json!({
            "title": "Backend",
            "total_questions": 15,
            "difficulty_distribution": {"easy": 0.6, "medium": 0.6, "hard": 0.0},
            "passing_score_threshold": 70
        });
        let (status, _) = call(&app, Method::POST, "/api/v1/assessments", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let good = json!({
            "title": "Backend",
            "question_set_id": DEMO_QUESTION_SET_ID,
            "total_questions": 15,
            "difficulty_distribution": {"easy": 0.2, "medium": 0.5, "hard": 0.3},
            "passing_score_threshold": 70
        });
        let (status, created) = call(&app, Method::POST, "/api/v1/assessments", Some(good)).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["assessment_id"].as_str().unwrap().to_string();

        let (status, plan) = call(&app, Method::GET, &format!("/api/v1/assessments/{id}/plan"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plan["by_difficulty"], json!({"easy": 3, "medium": 8, "hard": 4}));
        assert_eq!(plan["by_type"]["mcq"], json!(15));

        let (status, started) = call(
            &app,
            Method::POST,
            "/api/v1/sessions",
            Some(json!({"assessment_id": id, "experience": "7-11"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(started["passing_threshold"], json!(70));
    }
}
