use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use conductor_server::config::{Config, ServiceConfig};
use conductor_server::{app, AppState};
use conductor_types::Collaborator;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt; // for oneshot

/// Starts collaborators that answer every path, with VAD stalled for
/// `vad_delay` so runs stay in flight.
async fn start_collaborators(vad_delay: Duration) -> String {
    let app = Router::new()
        .route(
            "/detect",
            post(move || async move {
                tokio::time::sleep(vad_delay).await;
                Json(json!({"detected_speech": true}))
            }),
        )
        .route("/transcribe", post(|| async { Json(json!({"text": "hi"})) }))
        .route("/classify", post(|| async { Json(json!({"intent": "greeting"})) }))
        .route("/store", post(|| async { Json(json!({"status": "stored"})) }))
        .route("/generate", post(|| async { Json(json!({"response": "hello"})) }))
        .route(
            "/synthesize",
            post(|| async { Json(json!({"audio_url": "/audio/1.wav"})) }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn test_state(base_url: &str) -> AppState {
    let mut config = Config::default();
    for collaborator in Collaborator::ALL {
        config.services.insert(
            collaborator,
            ServiceConfig {
                url: Some(base_url.to_string()),
                timeout_secs: Some(5),
            },
        );
    }
    config.retry.base_delay_ms = 5;
    config.retry.max_delay_ms = 20;
    AppState::from_config(&config).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn audio_trigger(run_id: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/process_audio")
        .header("content-type", "application/octet-stream");
    if let Some(run_id) = run_id {
        builder = builder.header("X-Run-Id", run_id);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn test_health_lists_dependencies() {
    let state = test_state("http://collaborators.test:9000");
    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-process-time"));

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service_name"], "orchestrator");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    let dependencies = json["dependencies"].as_object().unwrap();
    assert_eq!(dependencies.len(), 6);
    assert_eq!(dependencies["asr_service"], "http://collaborators.test:9000");
    assert_eq!(dependencies["vad_service"], "http://collaborators.test:9000");
    assert_eq!(dependencies["tts_service"], "http://collaborators.test:9000");
    assert!(!dependencies.contains_key("asr"));
}

#[tokio::test]
async fn test_list_workflows() {
    let state = test_state("http://collaborators.test:9000");
    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/api/v1/workflows")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let workflows = json.as_array().unwrap();
    assert_eq!(workflows.len(), 2);
    assert_eq!(workflows[0]["name"], "audio_pipeline");
    assert_eq!(workflows[0]["steps"][0]["service"], "vad");
    assert_eq!(workflows[0]["steps"][4]["policy"], "fallback");
    assert_eq!(workflows[1]["name"], "text_pipeline");
}

#[tokio::test]
async fn test_trigger_returns_processing_with_header_run_id() {
    let base = start_collaborators(Duration::ZERO).await;
    let state = test_state(&base);
    let supervisor = state.supervisor.clone();

    let response = app(state)
        .oneshot(audio_trigger(Some("run-http-1"), vec![1, 2, 3, 4]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json, json!({"status": "processing", "run_id": "run-http-1"}));

    supervisor.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_trigger_generates_run_id_when_absent() {
    let base = start_collaborators(Duration::ZERO).await;
    let state = test_state(&base);

    let response = app(state)
        .oneshot(audio_trigger(None, vec![9; 16]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    let run_id = json["run_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(run_id).is_ok());
}

#[tokio::test]
async fn test_invalid_run_id_is_rejected() {
    let state = test_state("http://collaborators.test:9000");
    let response = app(state)
        .oneshot(audio_trigger(Some("bad id/../x"), vec![1]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().starts_with("invalid run id"));
}

#[tokio::test]
async fn test_duplicate_in_flight_run_is_conflict() {
    let base = start_collaborators(Duration::from_millis(500)).await;
    let state = test_state(&base);
    let supervisor = state.supervisor.clone();
    let router = app(state);

    let first = router
        .clone()
        .oneshot(audio_trigger(Some("run-dup"), vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = router
        .oneshot(audio_trigger(Some("run-dup"), vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = json_body(second).await;
    assert_eq!(json["error"], "run run-dup is already in progress");

    supervisor.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_trigger_after_shutdown_is_unavailable() {
    let state = test_state("http://collaborators.test:9000");
    state.supervisor.shutdown(Duration::from_millis(10)).await;

    let response = app(state)
        .oneshot(audio_trigger(Some("run-late"), vec![1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_process_text_accepts_json() {
    let base = start_collaborators(Duration::ZERO).await;
    let state = test_state(&base);
    let supervisor = state.supervisor.clone();

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/process_text")
                .header("content-type", "application/json")
                .header("X-Run-Id", "run-text-1")
                .body(Body::from(json!({"text": "hello"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["run_id"], "run-text-1");

    supervisor.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_oversized_audio_is_rejected() {
    let state = test_state("http://collaborators.test:9000");
    let response = app(state)
        .oneshot(audio_trigger(Some("run-big"), vec![0; 10 * 1024 * 1024 + 1]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
