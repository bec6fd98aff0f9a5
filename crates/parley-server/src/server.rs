use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_engine::ChatService;
use parley_telemetry::TelemetryGuard;

use crate::handlers;

pub struct ServerConfig {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
}

impl AppState {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self {
            service,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/logs", get(handlers::logs))
        .route("/threads", get(handlers::list_threads).post(handlers::create_thread))
        .route("/threads/{id}", delete(handlers::delete_thread))
        .route(
            "/threads/{id}/messages",
            get(handlers::get_messages).post(handlers::post_message),
        )
        .route("/threads/{id}/title", put(handlers::rename_thread))
        .route("/threads/{id}/cancel", post(handlers::cancel_turn))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Returns once the listener is bound.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    let shutdown = CancellationToken::new();

    let router = build_router(state);
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    tracing::info!(%addr, "parley server started");

    Ok(ServerHandle {
        addr,
        shutdown,
        server,
    })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task did not exit cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_engine::{create_default_registry, ChatGraph, DecisionStep, Dispatcher, TitleGenerator, ToolsConfig};
    use parley_llm::{MockProvider, MockResponse};
    use parley_store::{MemoryCheckpointStore, TitleStore};
    use serde_json::{json, Value};

    async fn spawn(chat: Vec<MockResponse>, titles: Vec<MockResponse>) -> ServerHandle {
        let registry = Arc::new(create_default_registry(&ToolsConfig::default()).unwrap());
        let graph = ChatGraph::new(
            Arc::new(MemoryCheckpointStore::new()),
            DecisionStep::new(Arc::new(MockProvider::new(chat)), &registry),
            Dispatcher::new(registry),
        );
        let title_store = Arc::new(TitleStore::in_memory());
        let titler = TitleGenerator::new(Arc::new(MockProvider::new(titles)), Arc::clone(&title_store));
        let service = ChatService::new(graph, title_store).with_titler(titler);
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        start(config, AppState::new(Arc::new(service))).await.unwrap()
    }

    /// `(event name, data)` pairs from a fully buffered SSE body.
    fn parse_sse(body: &str) -> Vec<(String, Value)> {
        body.split("\n\n")
            .filter_map(|frame| {
                let mut name = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = Some(v.trim().to_string());
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data = serde_json::from_str(v.trim()).ok();
                    }
                }
                Some((name?, data?))
            })
            .collect()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = spawn(vec![], vec![]).await;
        assert!(handle.port() > 0);

        let resp = reqwest::get(handle.url("/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn create_thread_returns_placeholder_title() {
        let handle = spawn(vec![], vec![]).await;
        let resp = reqwest::Client::new()
            .post(handle.url("/threads"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let body: Value = resp.json().await.unwrap();
        assert!(body["thread_id"].as_str().unwrap().starts_with("thread_"));
        assert_eq!(body["title"], "New Chat...");
    }

    #[tokio::test]
    async fn message_turn_streams_sse_and_persists() {
        let handle = spawn(
            vec![MockResponse::stream_text("Hi there")],
            vec![MockResponse::stream_text("Friendly Greeting")],
        )
        .await;
        let client = reqwest::Client::new();

        let resp = client
            .post(handle.url("/threads/thread_web/messages"))
            .json(&json!({ "text": "hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let events = parse_sse(&resp.text().await.unwrap());
        let (name, data) = events.last().unwrap();
        assert_eq!(name, "completed");
        assert_eq!(data["type"], "completed");
        assert_eq!(data["message"]["content"], "Hi there");
        assert!(events.iter().any(|(n, d)| n == "token" && d["delta"] == "Hi there"));

        let history: Vec<Value> = client
            .get(handle.url("/threads/thread_web/messages"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["content"], "Hi there");

        let threads: Vec<Value> = client
            .get(handle.url("/threads"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(threads[0]["thread_id"], "thread_web");
        assert_eq!(threads[0]["title"], "Friendly Greeting");
    }

    #[tokio::test]
    async fn blank_message_rejected() {
        let handle = spawn(vec![], vec![]).await;
        let resp = reqwest::Client::new()
            .post(handle.url("/threads/thread_a/messages"))
            .json(&json!({ "text": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn unknown_thread_has_empty_history() {
        let handle = spawn(vec![], vec![]).await;
        let history: Vec<Value> = reqwest::get(handle.url("/threads/thread_nobody/messages"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn rename_then_delete() {
        let handle = spawn(vec![], vec![]).await;
        let client = reqwest::Client::new();

        let resp = client
            .put(handle.url("/threads/thread_r/title"))
            .json(&json!({ "title": "  Trip planning " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["title"], "Trip planning");

        let resp = client
            .put(handle.url("/threads/thread_r/title"))
            .json(&json!({ "title": " " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client.delete(handle.url("/threads/thread_r")).send().await.unwrap();
        assert_eq!(resp.status(), 204);
        let resp = client.delete(handle.url("/threads/thread_r")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn busy_thread_conflicts() {
        let handle = spawn(
            vec![MockResponse::delayed(
                std::time::Duration::from_millis(500),
                MockResponse::stream_text("slow"),
            )],
            vec![],
        )
        .await;
        let client = reqwest::Client::new();

        let first = client
            .post(handle.url("/threads/thread_busy/messages"))
            .json(&json!({ "text": "one" }))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        let second = client
            .post(handle.url("/threads/thread_busy/messages"))
            .json(&json!({ "text": "two" }))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 409);

        let resp = client.delete(handle.url("/threads/thread_busy")).send().await.unwrap();
        assert_eq!(resp.status(), 409);

        drop(first.text().await.unwrap());
    }

    #[tokio::test]
    async fn logs_empty_without_sink() {
        let handle = spawn(vec![], vec![]).await;
        let logs: Vec<Value> = reqwest::get(handle.url("/logs?level=warn"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(logs.is_empty());
    }
}
