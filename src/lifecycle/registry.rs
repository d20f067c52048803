//! Registration and dispatch of fatal-condition handlers.
//!
//! # Data Flow
//! ```text
//! panic hook ─────────┐
//! SIGINT / SIGTERM ───┼─▶ FatalReporter ─▶ mpsc ─▶ dispatcher task
//! watched tasks/exit ─┘                              │
//!                                                     ▼
//!             claim TerminationState → log → fan out handlers → finalize
//! ```
//!
//! # Design Decisions
//! - One dispatcher task, so reaction chains never overlap
//! - The first terminal event owns the shutdown; later ones are dropped
//! - A second SIGINT/SIGTERM bypasses the dispatcher and exits at once
//! - A panicking finalize still terminates, with the crash exit code
//! - Handler fan-out settles every handler (errors and panics included)
//!   before the finalize action runs

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CrashConfig;
use crate::lifecycle::condition::{Condition, FatalEvent};
use crate::lifecycle::crash::{CrashReport, CrashResponder, ExitCallback, HttpCrashResponder};
use crate::lifecycle::fatal::{panic_message, FatalError};
use crate::lifecycle::latest::LatestResponse;
use crate::lifecycle::reporter::FatalReporter;
use crate::lifecycle::shutdown::ServerHandle;
use crate::lifecycle::signals::{spawn_signal_listeners, SignalSink};
use crate::lifecycle::termination::{ProcessTerminator, TerminationPhase, TerminationState, Terminator};
use crate::observability::metrics;

/// Error a custom handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

type Handler = Arc<dyn Fn(Condition) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

struct HandlerRegistration {
    condition: Condition,
    handler: Handler,
}

/// Error type for registry setup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("fatal-condition listeners are already registered")]
    AlreadyRegistered,
    #[error("failed to install signal listeners: {0}")]
    Signal(#[from] std::io::Error),
}

/// A single handler that did not complete cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Registration order among the handlers of this condition.
    pub index: usize,
    pub reason: String,
}

/// Outcome of a fan-out where not every handler succeeded.
#[derive(Debug, thiserror::Error)]
pub enum FanOutError {
    #[error("{count} {condition} handler(s) failed", count = .failures.len())]
    Failed {
        condition: Condition,
        failures: Vec<HandlerFailure>,
    },
    #[error("{condition} handlers did not settle within {after:?}")]
    TimedOut { condition: Condition, after: Duration },
}

/// Tunables for the finalize actions.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Exit code used after a crash; must avoid the runtime's own codes.
    pub crash_exit_code: i32,
    /// Upper bound on the whole handler fan-out.
    pub handler_timeout: Option<Duration>,
    /// Route panics into the dispatcher. Turn off when the embedding
    /// application owns the panic hook.
    pub install_panic_hook: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            crash_exit_code: CrashConfig::default().exit_code,
            handler_timeout: None,
            install_panic_hook: true,
        }
    }
}

impl From<&CrashConfig> for RegistryOptions {
    fn from(config: &CrashConfig) -> Self {
        Self {
            crash_exit_code: config.exit_code,
            handler_timeout: config.handler_timeout_ms.map(Duration::from_millis),
            install_panic_hook: true,
        }
    }
}

/// Process-wide registry of fatal-condition handlers.
///
/// Construct once at startup, share via `Arc`, and call
/// [`register`](Self::register) once the server is up.
pub struct ErrorHandlerRegistry {
    registrations: Mutex<Vec<HandlerRegistration>>,
    latest: LatestResponse,
    responder: Arc<dyn CrashResponder>,
    terminator: Arc<dyn Terminator>,
    options: RegistryOptions,
    state: TerminationState,
    reporter: FatalReporter,
    events: Mutex<Option<mpsc::UnboundedReceiver<FatalEvent>>>,
    server: OnceLock<Arc<dyn ServerHandle>>,
    signalled: AtomicBool,
}

impl ErrorHandlerRegistry {
    pub fn new(
        latest: LatestResponse,
        responder: Arc<dyn CrashResponder>,
        terminator: Arc<dyn Terminator>,
        options: RegistryOptions,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registrations: Mutex::new(Vec::new()),
            latest,
            responder,
            terminator,
            options,
            state: TerminationState::new(),
            reporter: FatalReporter::new(tx),
            events: Mutex::new(Some(rx)),
            server: OnceLock::new(),
            signalled: AtomicBool::new(false),
        })
    }

    /// Registry wired to the HTTP crash responder and the real process exit.
    pub fn from_config(config: &CrashConfig, latest: LatestResponse) -> Arc<Self> {
        Self::new(
            latest,
            Arc::new(HttpCrashResponder::from_config(config)),
            Arc::new(ProcessTerminator),
            RegistryOptions::from(config),
        )
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<HandlerRegistration>> {
        self.registrations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler for `condition`. Handlers run in registration order.
    pub fn on<F, Fut>(&self, condition: Condition, handler: F)
    where
        F: Fn(Condition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |c| handler(c).boxed());
        self.registrations().push(HandlerRegistration { condition, handler });
    }

    /// Number of handlers registered for `condition`.
    pub fn handler_count(&self, condition: Condition) -> usize {
        self.registrations()
            .iter()
            .filter(|r| r.condition == condition)
            .count()
    }

    /// Sender for fatal events, usable from anywhere in the process.
    pub fn reporter(&self) -> FatalReporter {
        self.reporter.clone()
    }

    pub fn phase(&self) -> TerminationPhase {
        self.state.phase()
    }

    /// Attach the panic hook, signal listeners and the dispatcher.
    ///
    /// Must be called once, from within a Tokio runtime, after the server is
    /// up. Returns the dispatcher task.
    pub fn register(self: &Arc<Self>, server: Arc<dyn ServerHandle>) -> Result<JoinHandle<()>, RegistryError> {
        self.attach(server, spawn_signal_listeners)
    }

    fn attach<S>(self: &Arc<Self>, server: Arc<dyn ServerHandle>, listen: S) -> Result<JoinHandle<()>, RegistryError>
    where
        S: FnOnce(SignalSink) -> std::io::Result<JoinHandle<()>>,
    {
        let mut slot = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut events) = slot.take() else {
            return Err(RegistryError::AlreadyRegistered);
        };

        let registry = Arc::clone(self);
        if let Err(e) = listen(Box::new(move |event| registry.deliver_signal(event))) {
            // Nothing was attached; leave the registry usable for a retry.
            *slot = Some(events);
            return Err(e.into());
        }
        drop(slot);

        let _ = self.server.set(server);
        if self.options.install_panic_hook {
            install_panic_hook(self.reporter());
        }

        let registry = Arc::clone(self);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                registry.dispatch(event).await;
            }
        });

        tracing::info!(
            crash_exit_code = self.options.crash_exit_code,
            "Fatal-condition listeners registered"
        );
        Ok(dispatcher)
    }

    /// Forward a SIGINT/SIGTERM delivery to the dispatcher.
    ///
    /// The first signal starts the graceful chain. Any later one exits
    /// immediately with `128 + signo`, since the chain it would queue behind
    /// may be stuck in a handler. Returns `false` once the dispatcher is gone.
    pub fn deliver_signal(&self, event: FatalEvent) -> bool {
        let condition = event.condition();
        if let Some(code) = condition.signal_exit_code() {
            if self.signalled.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    condition = %condition,
                    phase = ?self.state.phase(),
                    exit_code = code,
                    "Repeated signal during shutdown, forcing exit"
                );
                self.terminator.terminate(code);
                return true;
            }
        }
        self.reporter.deliver(event)
    }

    /// Run the full reaction chain for one event.
    ///
    /// Only the first terminal event is acted on; later ones are logged and
    /// dropped.
    pub async fn dispatch(&self, event: FatalEvent) {
        let condition = event.condition();
        metrics::record_condition(condition);

        if !self.state.try_begin() {
            tracing::warn!(
                condition = %condition,
                phase = ?self.state.phase(),
                "Already terminating, ignoring condition"
            );
            return;
        }

        match &event {
            FatalEvent::UncaughtException(err) => {
                tracing::error!(error = %err, "Uncaught exception");
            }
            FatalEvent::UnhandledRejection(err) => {
                tracing::error!(error = %err, "Unhandled rejection");
            }
            FatalEvent::Interrupt | FatalEvent::Terminate => {
                tracing::info!("Received {}", condition);
            }
            FatalEvent::ProcessExit(_) => {}
        }

        if let Err(e) = self.run_handlers(condition).await {
            tracing::warn!(error = %e, "Custom handlers did not all succeed");
        }

        let finalized = AssertUnwindSafe(self.finalize(event)).catch_unwind().await;
        if let Err(panic) = finalized {
            tracing::error!(
                condition = %condition,
                panic = %panic_message(panic.as_ref()),
                "Finalize action panicked"
            );
            self.terminator.terminate(self.options.crash_exit_code);
        }
        self.state.complete();
    }

    /// Run every handler registered for `condition` and wait for all to settle.
    pub async fn run_handlers(&self, condition: Condition) -> Result<(), FanOutError> {
        let handlers: Vec<Handler> = self
            .registrations()
            .iter()
            .filter(|r| r.condition == condition)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        if handlers.is_empty() {
            return Ok(());
        }

        tracing::debug!(condition = %condition, handlers = handlers.len(), "Running custom handlers");

        let calls = handlers.into_iter().enumerate().map(|(index, handler)| async move {
            let outcome = AssertUnwindSafe(async move { handler(condition).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(HandlerFailure {
                    index,
                    reason: e.to_string(),
                }),
                Err(panic) => Some(HandlerFailure {
                    index,
                    reason: format!("handler panicked: {}", panic_message(panic.as_ref())),
                }),
            }
        });

        let settled = match self.options.handler_timeout {
            Some(after) => match tokio::time::timeout(after, join_all(calls)).await {
                Ok(settled) => settled,
                Err(_) => {
                    metrics::record_handler_failures(condition, 1);
                    return Err(FanOutError::TimedOut { condition, after });
                }
            },
            None => join_all(calls).await,
        };

        let failures: Vec<HandlerFailure> = settled.into_iter().flatten().collect();
        if failures.is_empty() {
            Ok(())
        } else {
            metrics::record_handler_failures(condition, failures.len() as u64);
            Err(FanOutError::Failed { condition, failures })
        }
    }

    async fn finalize(&self, event: FatalEvent) {
        match event {
            FatalEvent::UncaughtException(err) | FatalEvent::UnhandledRejection(err) => {
                self.send_crash(err, false, Some(self.options.crash_exit_code)).await;
            }
            FatalEvent::ProcessExit(code) => {
                let err = FatalError::new(format!("Process exited with code {code}"));
                self.send_crash(err, code == 0, None).await;
                self.terminator.terminate(code);
            }
            FatalEvent::Interrupt | FatalEvent::Terminate => {
                match self.server.get() {
                    Some(server) => server.close().await,
                    None => tracing::warn!("No server registered, nothing to close"),
                }
                self.terminator.terminate(0);
            }
        }
    }

    async fn send_crash(&self, error: FatalError, silent: bool, exit_code: Option<i32>) {
        let callback = exit_code.map(|code| ExitCallback::new(code, Arc::clone(&self.terminator)));
        let fired = callback.as_ref().map(ExitCallback::fired);

        let report = CrashReport {
            error,
            silent,
            callback,
        };
        if let Err(e) = self.responder.send(report, &self.latest).await {
            tracing::warn!(error = %e, "Crash response not delivered");
        }

        // The responder may have failed or dropped the callback.
        if let (Some(code), Some(fired)) = (exit_code, fired) {
            if !fired.swap(true, Ordering::SeqCst) {
                self.terminator.terminate(code);
            }
        }
    }
}

impl std::fmt::Debug for ErrorHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlerRegistry")
            .field("handlers", &self.registrations().len())
            .field("options", &self.options)
            .field("phase", &self.state.phase())
            .finish()
    }
}

/// Route panics on any thread into the dispatcher as uncaught exceptions.
///
/// The previously installed hook still runs, so the usual panic message and
/// backtrace reach stderr.
fn install_panic_hook(reporter: FatalReporter) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let mut error = FatalError::from_panic(info.payload());
        if let Some(location) = info.location() {
            error = error.with_location(location.to_string());
        }
        reporter.uncaught(error);
        previous(info);
    }));
}
