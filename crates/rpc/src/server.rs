use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{
        Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, HeaderName,
        },
    },
    response::{IntoResponse, Response},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{BlockClock, handle_request};

/// Headers present on every response, including errors and preflight answers.
const RESPONSE_HEADERS: [(HeaderName, &str); 4] = [
    (CONTENT_TYPE, "text/plain"),
    (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS"),
    (ACCESS_CONTROL_ALLOW_HEADERS, "content-type"),
];

/// The JSON-RPC server of the emulated node.
///
/// Requests are accepted on any path. The server runs until the future returned by
/// [`RpcServer::serve`] is dropped.
#[derive(Debug)]
pub struct RpcServer {
    listener: TcpListener,
    clock: Arc<BlockClock>,
}

impl RpcServer {
    /// Binds the listening socket on all interfaces.
    pub async fn bind(port: u16, clock: BlockClock) -> Result<Self> {
        Self::bind_to(SocketAddr::from(([0, 0, 0, 0], port)), clock).await
    }

    pub async fn bind_to(address: SocketAddr, clock: BlockClock) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind the JSON-RPC listener to {address}"))?;
        Ok(Self {
            listener,
            clock: Arc::new(clock),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read the address of the JSON-RPC listener")
    }

    /// Serves requests until the returned future is dropped.
    pub async fn serve(self) -> Result<()> {
        tracing::info!(address = %self.local_addr()?, "Starting listening");
        axum::serve(self.listener, router(self.clock))
            .await
            .context("JSON-RPC server failed")
    }
}

pub fn router(clock: Arc<BlockClock>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(clock)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(method: Method, State(clock): State<Arc<BlockClock>>, body: Bytes) -> Response {
    match method {
        Method::POST => rpc(&clock, &body),
        Method::OPTIONS => (StatusCode::OK, RESPONSE_HEADERS).into_response(),
        _ => (
            StatusCode::NOT_IMPLEMENTED,
            RESPONSE_HEADERS,
            format!("Unsupported HTTP method {method}"),
        )
            .into_response(),
    }
}

fn rpc(clock: &BlockClock, body: &[u8]) -> Response {
    let response = match handle_request(body, clock) {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%error, "Rejected JSON-RPC request");
            return (error.status_code(), RESPONSE_HEADERS, error.error_message()).into_response();
        }
    };

    match serde_json::to_vec(&response) {
        Ok(body) => (StatusCode::OK, RESPONSE_HEADERS, body).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to serialize the JSON-RPC response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                RESPONSE_HEADERS,
                "Internal error",
            )
                .into_response()
        }
    }
}
