//! Live worker handles.
//!
//! The dispatcher records every spawned worker here and removes it when the
//! worker's task ends, however it ends. Relays reach a worker through its
//! outbox; `stop` reaches it through its cancellation token.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::ConnectionId;

/// Why a line did not reach a worker's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// No live worker has this handle.
    Missing,
    /// The worker is not draining its outbox fast enough.
    Full,
    /// The worker's writer has gone away.
    Closed,
}

#[derive(Debug)]
struct WorkerHandle {
    outbox: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Set of running workers keyed by connection handle.
#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: Mutex<HashMap<ConnectionId, WorkerHandle>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new worker and returns its outbox receiver and stop token.
    ///
    /// The token is a child of `parent`, so cancelling `parent` stops every
    /// worker at once.
    pub fn register(
        &self,
        id: ConnectionId,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (mpsc::Receiver<String>, CancellationToken) {
        let (outbox, inbox) = mpsc::channel(capacity.max(1));
        let cancel = parent.child_token();
        self.workers.lock().insert(
            id,
            WorkerHandle {
                outbox,
                cancel: cancel.clone(),
            },
        );
        (inbox, cancel)
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.workers.lock().remove(&id);
    }

    /// Queues one line for a worker without waiting.
    pub fn deliver(&self, id: ConnectionId, line: String) -> Result<(), DeliveryError> {
        let workers = self.workers.lock();
        let handle = workers.get(&id).ok_or(DeliveryError::Missing)?;
        handle.outbox.try_send(line).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Handles of workers whose task still owns its outbox receiver.
    pub fn live_handles(&self) -> HashSet<ConnectionId> {
        self.workers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.outbox.is_closed())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Asks one worker to stop. Returns false if it is not running.
    pub fn stop(&self, id: ConnectionId) -> bool {
        match self.workers.lock().get(&id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Asks every worker to stop.
    pub fn stop_all(&self) -> usize {
        let workers = self.workers.lock();
        for handle in workers.values() {
            handle.cancel.cancel();
        }
        workers.len()
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }
}
