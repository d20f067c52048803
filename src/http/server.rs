//! HTTP server setup and invocation dispatch.
//!
//! # Responsibilities
//! - Create Axum Router routing every path to the hosted function
//! - Wire up middleware (tracing, request timeout)
//! - Publish each invocation as the latest response for crash handling
//! - Race the function against a crash response
//! - Graceful shutdown through [`ServerControl`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::HostConfig;
use crate::http::function::{Function, FunctionError, Invocation};
use crate::http::request::{invocation_id, X_REQUEST_ID};
use crate::http::response::{crash_response, error_response};
use crate::lifecycle::{FatalError, LatestResponse, ServerControl, Shutdown};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub function: Arc<dyn Function>,
    pub latest: LatestResponse,
    pub expose_error_details: bool,
    pub crash_wait: Duration,
}

/// HTTP server hosting a single function.
pub struct InvocationServer {
    router: Router,
    shutdown: Shutdown,
    shutdown_rx: broadcast::Receiver<()>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    drain_timeout: Duration,
}

impl InvocationServer {
    /// Create a new server for `function`, publishing invocations to `latest`.
    pub fn new(config: &HostConfig, function: Arc<dyn Function>, latest: LatestResponse) -> Self {
        let state = AppState {
            function,
            latest,
            expose_error_details: config.crash.expose_error_details,
            crash_wait: Duration::from_millis(config.crash.response_wait_ms),
        };

        let shutdown = Shutdown::new();
        // Subscribe before anyone can trigger, so an early close is not lost.
        let shutdown_rx = shutdown.subscribe();
        let (closed_tx, closed_rx) = watch::channel(false);

        Self {
            router: Self::build_router(config, state),
            shutdown,
            shutdown_rx,
            closed_tx,
            closed_rx,
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &HostConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(invoke_handler))
            .route("/", any(invoke_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Handle used to close this server once it is running.
    pub fn control(&self) -> ServerControl {
        ServerControl::new(self.shutdown.clone(), self.closed_rx.clone(), self.drain_timeout)
    }

    /// Run the server until closed through its [`ServerControl`].
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Invocation server starting");

        let mut shutdown_rx = self.shutdown_rx;
        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                tracing::info!("Stopped accepting connections, draining");
            })
            .await;

        self.closed_tx.send_replace(true);
        tracing::info!("Invocation server stopped");
        result
    }
}

enum Outcome {
    Finished(Result<Result<Response, FunctionError>, JoinError>),
    Crashed(Option<Response>),
}

/// Invoke the hosted function for one request.
async fn invoke_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let id = invocation_id(request.headers());

    tracing::debug!(
        invocation_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
        "Dispatching invocation"
    );

    let mut in_flight = state.latest.begin(id);
    let function = Arc::clone(&state.function);
    let mut task = tokio::spawn(async move { function.invoke(Invocation::new(id, request)).await });

    let outcome = tokio::select! {
        joined = &mut task => Outcome::Finished(joined),
        crashed = in_flight.crash_response() => Outcome::Crashed(crashed.ok()),
    };

    let mut response = match outcome {
        Outcome::Crashed(Some(response)) => {
            // The process is going down; nobody will read the function's answer.
            task.abort();
            response
        }
        // Superseded by a newer invocation: only the function can answer now.
        Outcome::Crashed(None) => match task.await {
            Ok(result) => function_response(id, result, &state),
            Err(e) => fallback_crash(id, e, &state),
        },
        Outcome::Finished(Ok(result)) => function_response(id, result, &state),
        Outcome::Finished(Err(e)) => {
            match tokio::time::timeout(state.crash_wait, in_flight.crash_response()).await {
                Ok(Ok(response)) => response,
                _ => fallback_crash(id, e, &state),
            }
        }
    };
    drop(in_flight);

    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    metrics::record_invocation(response.status().as_u16(), start);
    response
}

fn function_response(id: uuid::Uuid, result: Result<Response, FunctionError>, state: &AppState) -> Response {
    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(invocation_id = %id, error = %e, "Function returned an error");
            error_response(&e.to_string(), state.expose_error_details)
        }
    }
}

/// The function died and no crash response arrived in time.
fn fallback_crash(id: uuid::Uuid, error: JoinError, state: &AppState) -> Response {
    let fatal = if error.is_panic() {
        FatalError::from_panic(error.into_panic().as_ref())
    } else {
        FatalError::new("function task was cancelled")
    };
    tracing::error!(invocation_id = %id, error = %fatal, "Invocation crashed without a crash response");
    crash_response(&fatal, state.expose_error_details)
}
