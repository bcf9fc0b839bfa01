use crate::config::ServerConfig;
use crate::controller::RobotStatus;
use crate::dispatch::CommandDispatcher;
use crate::error::{DorabotError, Result};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for the Axum server
#[derive(Clone)]
struct ServerState {
    dispatcher: Arc<CommandDispatcher>,
}

/// HTTP transport for the command surface: the remote control page invokes
/// named macros with `POST /macros/{name}` and always receives the current
/// status snapshot. Unknown names change nothing; operation failures are
/// logged on the robot, not surfaced to the caller.
pub struct MacroServer {
    config: ServerConfig,
    dispatcher: Arc<CommandDispatcher>,
}

impl MacroServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<CommandDispatcher>) -> Self {
        Self { config, dispatcher }
    }

    fn router(dispatcher: Arc<CommandDispatcher>) -> Router {
        let state = ServerState { dispatcher };

        Router::new()
            .route("/macros/:name", post(macro_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DorabotError::system(format!("Failed to bind macro server on {}: {}", addr, e))
        })?;

        info!("Macro server listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = Self::router(Arc::clone(&self.dispatcher));

        axum::serve(listener, app)
            .await
            .map_err(|e| DorabotError::system(format!("Macro server error: {}", e)))?;

        Ok(())
    }
}

async fn macro_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
) -> Json<RobotStatus> {
    let status = match state.dispatcher.dispatch(&name).await {
        Some(status) => status,
        // Unknown macro: ignored, reply with the unchanged snapshot.
        None => state.dispatcher.status().await,
    };
    Json(status)
}

async fn health_handler(State(state): State<ServerState>) -> Json<RobotStatus> {
    Json(state.dispatcher.status().await)
}
