use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chat_message::InboundMessage;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::flow::manager::FlowManager;

/// Body of `POST /webhook`: one message or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundPayload {
    Batch { messages: Vec<InboundMessage> },
    Single(InboundMessage),
}

impl InboundPayload {
    fn into_messages(self) -> Vec<InboundMessage> {
        match self {
            InboundPayload::Batch { messages } => messages,
            InboundPayload::Single(message) => vec![message],
        }
    }
}

pub fn router(manager: Arc<FlowManager>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/webhook", post(receive))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{user}", delete(end_session))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, manager: Arc<FlowManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Started HTTP server on http://{}", listener.local_addr()?);
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await
        .context("webhook server")?;
    info!("HTTP server stopped");
    Ok(())
}

async fn banner(State(manager): State<Arc<FlowManager>>) -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "flows": manager.registry().names(),
        "default_flow": manager.registry().default_flow(),
    }))
}

async fn health(State(manager): State<Arc<FlowManager>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "store": manager.store().name(),
    }))
}

async fn receive(
    State(manager): State<Arc<FlowManager>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let messages = match serde_json::from_value::<InboundPayload>(body) {
        Ok(payload) => payload.into_messages(),
        Err(e) => {
            warn!("Rejected malformed webhook payload: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };
    if messages.is_empty() || messages.iter().any(|m| m.user.trim().is_empty()) {
        warn!("Rejected webhook payload without a user key");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "every message needs a non-empty `user`" })),
        );
    }

    let mut outcomes = Vec::with_capacity(messages.len());
    for message in messages {
        outcomes.push(manager.handle_message(message).await);
    }
    (StatusCode::OK, Json(json!({ "outcomes": outcomes })))
}

async fn list_sessions(State(manager): State<Arc<FlowManager>>) -> impl IntoResponse {
    Json(manager.sessions().await)
}

async fn end_session(
    State(manager): State<Arc<FlowManager>>,
    Path(user): Path<String>,
) -> impl IntoResponse {
    manager.end_session(&user).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::sink::RecordingSink,
        flow::{
            FlowError, FlowHandler, StepContext, StepResult, manager::ManagerSettings,
            registry::FlowRegistry, session::InMemorySessionStore,
        },
    };
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::TimeDelta;
    use tower::ServiceExt; // for `app.oneshot()`

    #[derive(Debug)]
    struct Parrot;

    #[async_trait]
    impl FlowHandler for Parrot {
        fn name(&self) -> &str {
            "parrot"
        }
        async fn process_step(&self, ctx: &StepContext<'_>) -> Result<StepResult, FlowError> {
            ctx.send_text(ctx.text().to_string()).await;
            Ok(StepResult::goto("listening"))
        }
    }

    fn app() -> Router {
        let registry = FlowRegistry::builder()
            .register(Arc::new(Parrot))
            .default_flow("parrot")
            .build()
            .unwrap();
        let manager = FlowManager::new(
            registry,
            InMemorySessionStore::new(TimeDelta::hours(24)),
            RecordingSink::new(),
            ManagerSettings::default(),
        );
        router(manager)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_webhook_single_message() {
        let response = app()
            .oneshot(post_json("/webhook", json!({"user": "447700900001", "text": "polly"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let outcome = &body["outcomes"][0];
        assert_eq!(outcome["flow"], "parrot");
        assert_eq!(outcome["step"], "listening");
        assert_eq!(outcome["messages_sent"], 1);
    }

    #[tokio::test]
    async fn test_webhook_batch_and_sessions() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/webhook",
                json!({"messages": [{"user": "a", "text": "1"}, {"user": "b", "choice": "x"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["outcomes"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let sessions = body_json(response).await;
        assert_eq!(sessions.as_array().unwrap().len(), 2);
        assert_eq!(sessions[0]["user"], "a");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/sessions/a")
                    .method("DELETE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::builder().uri("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_rejects_missing_user() {
        let response = app()
            .oneshot(post_json("/webhook", json!({"user": "  ", "text": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app()
            .oneshot(post_json("/webhook", json!({"text": "who am i"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_banner() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["store"], "InMemorySessionStore");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let banner = body_json(response).await;
        assert_eq!(banner["default_flow"], "parrot");
        assert_eq!(banner["flows"][0], "parrot");
    }
}
