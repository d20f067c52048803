//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use function_host::lifecycle::{
    CrashError, CrashReport, CrashResponder, ErrorHandlerRegistry, LatestResponse, RegistryOptions,
    ServerHandle, Terminator,
};

/// Ordered log of everything the fakes observed.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Records exit codes instead of exiting.
pub struct RecordingTerminator {
    journal: Journal,
    codes: Mutex<Vec<i32>>,
}

impl RecordingTerminator {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            codes: Mutex::new(Vec::new()),
        }
    }

    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        self.journal.push(format!("exit:{code}"));
        self.codes.lock().unwrap().push(code);
    }
}

/// Server whose close takes a little while, so ordering is observable.
pub struct RecordingServer {
    journal: Journal,
}

impl RecordingServer {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl ServerHandle for RecordingServer {
    async fn close(&self) {
        self.journal.push("close:start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.journal.push("close:done");
    }
}

/// What the crash responder was handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenReport {
    pub message: String,
    pub silent: bool,
    pub exit_code: Option<i32>,
}

/// Records crash reports; optionally "forgets" to run the exit callback or
/// panics after recording.
pub struct RecordingResponder {
    journal: Journal,
    reports: Mutex<Vec<SeenReport>>,
    run_callback: bool,
    panics: bool,
}

impl RecordingResponder {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            reports: Mutex::new(Vec::new()),
            run_callback: true,
            panics: false,
        }
    }

    pub fn dropping_callback(journal: Journal) -> Self {
        Self {
            run_callback: false,
            ..Self::new(journal)
        }
    }

    pub fn panicking(journal: Journal) -> Self {
        Self {
            panics: true,
            ..Self::new(journal)
        }
    }

    pub fn reports(&self) -> Vec<SeenReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl CrashResponder for RecordingResponder {
    async fn send(&self, report: CrashReport, _res: &LatestResponse) -> Result<(), CrashError> {
        self.journal.push(format!("crash:{}", report.error.message()));
        self.reports.lock().unwrap().push(SeenReport {
            message: report.error.message().to_string(),
            silent: report.silent,
            exit_code: report.callback.as_ref().map(|c| c.code()),
        });
        if self.panics {
            panic!("responder blew up");
        }
        if self.run_callback {
            if let Some(callback) = report.callback {
                callback.invoke();
            }
        }
        Ok(())
    }
}

/// A registry wired to recording fakes.
pub struct Harness {
    pub journal: Journal,
    pub registry: Arc<ErrorHandlerRegistry>,
    pub responder: Arc<RecordingResponder>,
    pub terminator: Arc<RecordingTerminator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        let journal = Journal::default();
        Self::build(journal.clone(), Arc::new(RecordingResponder::new(journal)), options)
    }

    pub fn build(journal: Journal, responder: Arc<RecordingResponder>, options: RegistryOptions) -> Self {
        let terminator = Arc::new(RecordingTerminator::new(journal.clone()));
        let registry = ErrorHandlerRegistry::new(
            LatestResponse::new(),
            responder.clone(),
            terminator.clone(),
            options,
        );
        Self {
            journal,
            registry,
            responder,
            terminator,
        }
    }

    pub fn server(&self) -> Arc<RecordingServer> {
        Arc::new(RecordingServer::new(self.journal.clone()))
    }
}
