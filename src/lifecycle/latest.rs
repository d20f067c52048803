//! Back-reference to the response of the most recent invocation.
//!
//! The invocation pipeline calls [`LatestResponse::begin`] for every request and
//! races the returned receiver against the function. The crash responder takes
//! whatever entry is current at crash time and writes its best-effort answer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::response::Response;
use tokio::sync::oneshot;
use uuid::Uuid;

struct Pending {
    id: Uuid,
    tx: oneshot::Sender<Response>,
}

/// Shared slot holding the most recently dispatched invocation.
#[derive(Clone, Default)]
pub struct LatestResponse {
    slot: Arc<Mutex<Option<Pending>>>,
}

impl LatestResponse {
    pub fn new() -> Self {
        Self::default()
    }

    // Crash handling runs after panics; a poisoned slot is still usable.
    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `id` the latest invocation.
    ///
    /// Any previous entry is superseded; its receiver observes a closed channel.
    pub fn begin(&self, id: Uuid) -> InFlight {
        let (tx, rx) = oneshot::channel();
        *self.lock() = Some(Pending { id, tx });
        InFlight {
            id,
            slot: self.clone(),
            crash_rx: rx,
        }
    }

    /// Clear the slot if `id` is still the latest invocation.
    pub fn finish(&self, id: Uuid) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|p| p.id == id) {
            *slot = None;
        }
    }

    /// Hand the pending response out of the slot, if any.
    pub fn take(&self) -> Option<PendingResponse> {
        self.lock()
            .take()
            .map(|p| PendingResponse { id: p.id, tx: p.tx })
    }

    /// Id of the invocation currently awaiting a response.
    pub fn current(&self) -> Option<Uuid> {
        self.lock().as_ref().map(|p| p.id)
    }
}

impl std::fmt::Debug for LatestResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestResponse")
            .field("current", &self.current())
            .finish()
    }
}

/// A response channel taken from the slot by the crash responder.
#[derive(Debug)]
pub struct PendingResponse {
    id: Uuid,
    tx: oneshot::Sender<Response>,
}

impl PendingResponse {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deliver `response` to the waiting invocation.
    ///
    /// Gives the response back if the invocation already went away.
    pub fn respond(self, response: Response) -> Result<(), Response> {
        self.tx.send(response)
    }
}

/// Pipeline side of a [`LatestResponse`] entry. Clears the slot on drop.
#[derive(Debug)]
pub struct InFlight {
    id: Uuid,
    slot: LatestResponse,
    crash_rx: oneshot::Receiver<Response>,
}

impl InFlight {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves with the crash response, or an error once superseded.
    pub fn crash_response(&mut self) -> &mut oneshot::Receiver<Response> {
        &mut self.crash_rx
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.slot.finish(self.id);
    }
}
