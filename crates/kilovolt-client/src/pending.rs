//! In-flight request tracking
//!
//! Maps request ids to one-shot completion slots. The caller issuing
//! `send` registers a slot and awaits it; the read loop resolves it.
//! Dropping an unresolved [`PendingSlot`] removes its entry, so cancelled
//! or timed-out requests leave nothing behind.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{KilovoltError, Result};
use crate::protocol::Response;

type Completion = oneshot::Sender<Result<Response>>;

#[derive(Debug, Default)]
struct TableState {
    slots: HashMap<String, Completion>,
    /// Set by `fail_all`; new registrations are refused until `reopen`
    closed: bool,
}

/// Shared table of pending requests
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Debug, Default)]
pub struct PendingRequestTable {
    state: Arc<Mutex<TableState>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the completion slot for `id`
    pub fn register(&self, id: &str) -> Result<PendingSlot> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(KilovoltError::ConnectionClosed);
        }
        if state.slots.contains_key(id) {
            return Err(KilovoltError::DuplicateRequestId(id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        state.slots.insert(id.to_string(), tx);
        Ok(PendingSlot {
            id: id.to_string(),
            rx,
            table: self.clone(),
        })
    }

    /// Complete the slot for `id` with `response`
    ///
    /// Returns `UnroutableResponse` when nobody is waiting on `id`; the
    /// caller decides how to report it.
    pub fn resolve(&self, id: &str, response: Response) -> Result<()> {
        let slot = self.state.lock().slots.remove(id);
        match slot {
            // The waiter may have gone away between removal and send
            Some(tx) => {
                let _ = tx.send(Ok(response));
                Ok(())
            }
            None => Err(KilovoltError::UnroutableResponse(id.to_string())),
        }
    }

    /// Fail every outstanding slot and refuse new registrations
    pub fn fail_all(&self, error: KilovoltError) -> usize {
        let drained: Vec<Completion> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.slots.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Accept registrations again after a `fail_all`
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of requests awaiting a response
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &str) {
        self.state.lock().slots.remove(id);
    }
}

/// Receiving half of a pending request
///
/// Resolves with the response, or with the error passed to `fail_all`.
#[derive(Debug)]
pub struct PendingSlot {
    id: String,
    rx: oneshot::Receiver<Result<Response>>,
    table: PendingRequestTable,
}

impl PendingSlot {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingSlot {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without an answer: the table was torn down
            Poll::Ready(Err(_)) => Poll::Ready(Err(KilovoltError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
