pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::generation::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Profile API
        .route("/api/v1/profiles", post(handlers::handle_create_profile))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consultation::validation::fixtures::base_document;
    use crate::content_store::testing::MemoryStore;
    use crate::content_store::RecordPatch;
    use crate::generation::pipeline::testing::pipeline;
    use crate::llm_client::testing::ScriptedTransport;
    use crate::llm_client::Generation;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(
        script: Vec<Result<Generation, crate::llm_client::LlmError>>,
    ) -> (Router, Arc<ScriptedTransport>) {
        let (app, transport, _) = router_with_store(script);
        (app, transport)
    }

    fn router_with_store(
        script: Vec<Result<Generation, crate::llm_client::LlmError>>,
    ) -> (Router, Arc<ScriptedTransport>, Arc<MemoryStore>) {
        let transport = ScriptedTransport::new(script);
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            pipeline: pipeline(transport.clone(), store.clone()),
        };
        (build_router(state), transport, store)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/profiles")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = router(vec![]);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_blank_name_is_bad_request() {
        let (app, transport) = router(vec![]);
        let response = app
            .oneshot(post_json(json!({
                "request": {"kind": "base", "name": "  ", "birthdate": "1990-01-15"}
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_streaming_answers_with_record_id_before_job_ends() {
        let (app, _, store) =
            router_with_store(vec![Ok(Generation::Complete(base_document().to_string()))]);
        let response = app
            .oneshot(post_json(json!({
                "request": {"kind": "base", "name": "X", "birthdate": "1990-01-15"},
                "stream": false
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body, json!({"type": "accepted", "recordId": 100}));

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !store
                .patches()
                .iter()
                .any(|p| matches!(p, RecordPatch::Complete { .. }))
            {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_waiting_non_streaming_returns_outcome() {
        let (app, _) = router(vec![Ok(Generation::Complete(base_document().to_string()))]);
        let response = app
            .oneshot(post_json(json!({
                "request": {"kind": "base", "name": "X", "birthdate": "1990-01-15"},
                "stream": false,
                "wait": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "complete");
        assert_eq!(body["recordId"], 100);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn test_streaming_returns_event_stream() {
        let (app, _) = router(vec![Ok(Generation::Complete(base_document().to_string()))]);
        let response = app
            .oneshot(post_json(json!({
                "request": {"kind": "base", "name": "X", "birthdate": "1990-01-15"},
                "stream": true
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: accepted"));
        assert!(text.contains("event: complete"));
        assert!(text.contains(r#""recordId":100"#));
    }
}
