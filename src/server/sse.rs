//! SSE transport.
//!
//! One `GET /sse` connection per client: the first frame names the endpoint
//! the client POSTs requests to, and every dispatcher response comes back as
//! a `message` event on the stream. Requests are dispatched off the request
//! path, since a patient-mode call can block for an entire task and its reply
//! travels over the SSE channel anyway.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::mcp::protocol::JsonRpcRequest;
use crate::mcp::ToolDispatcher;

struct SseState {
    dispatcher: Arc<ToolDispatcher>,
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
}

/// Start the SSE server and block until shutdown.
pub async fn serve(config: Arc<Config>, dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<()> {
    let state = Arc::new(SseState {
        dispatcher,
        sessions: RwLock::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/sse", get(connect_sse))
        .route("/messages", post(post_message))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Removes the session entry once the client stream is dropped.
struct SessionGuard {
    state: Arc<SseState>,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let state = Arc::clone(&self.state);
        let id = self.id;
        tokio::spawn(async move {
            state.sessions.write().await.remove(&id);
            tracing::info!("SSE session {} disconnected", id);
        });
    }
}

async fn connect_sse(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<String>(64);
    state.sessions.write().await.insert(session_id, tx);
    tracing::info!("SSE session {} connected", session_id);

    let guard = SessionGuard {
        state: Arc::clone(&state),
        id: session_id,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default()
            .event("endpoint")
            .data(format!("/messages?session_id={}", session_id)));

        while let Some(frame) = rx.recv().await {
            yield Ok(Event::default().event("message").data(frame));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Uuid,
}

async fn post_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<MessageQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> StatusCode {
    let Some(tx) = state.sessions.read().await.get(&query.session_id).cloned() else {
        return StatusCode::NOT_FOUND;
    };

    let dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(async move {
        if let Some(response) = dispatcher.handle(request).await {
            match serde_json::to_string(&response) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        tracing::warn!("SSE session closed before response delivery");
                    }
                }
                Err(e) => tracing::error!("Failed to serialize response: {}", e),
            }
        }
    });

    StatusCode::ACCEPTED
}
