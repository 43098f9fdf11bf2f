//! Correlation ids and the table of requests waiting for a response.

use crate::error::{ClientError, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::warn;
use spotify_protocol::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic correlation id source. The first id is 1 and the counter wraps
/// from `u32::MAX` to 0.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU32,
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        // fetch_add wraps on overflow
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

pub type Completion = Box<dyn FnOnce(Result<Message>) + Send>;

struct PendingRequest {
    deadline: Instant,
    completion: Completion,
}

/// Requests waiting for their response, keyed by correlation id.
/// Completions always run outside the table lock.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u32, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, correlation_id: u32, deadline: Instant, completion: Completion) {
        let previous = self.lock().insert(
            correlation_id,
            PendingRequest {
                deadline,
                completion,
            },
        );
        // Only possible after the id space wrapped with a request still open
        if let Some(stale) = previous {
            warn!("⚠️ Correlation id {} reused while pending", correlation_id);
            (stale.completion)(Err(ClientError::RequestTimedOut { correlation_id }));
        }
    }

    pub fn contains(&self, correlation_id: u32) -> bool {
        self.lock().contains_key(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the entry and return its completion, if one is pending
    pub fn take(&self, correlation_id: u32) -> Option<Completion> {
        self.lock()
            .remove(&correlation_id)
            .map(|request| request.completion)
    }

    /// Remove the entry and hand it the result. Returns false if no request
    /// with this id is pending.
    pub fn complete(&self, correlation_id: u32, result: Result<Message>) -> bool {
        match self.take(correlation_id) {
            Some(completion) => {
                completion(result);
                true
            }
            None => false,
        }
    }

    /// Drop the entry without completing it
    pub fn cancel(&self, correlation_id: u32) -> bool {
        self.lock().remove(&correlation_id).is_some()
    }

    /// Fail every entry whose deadline has passed. Returns the expired ids.
    pub fn expire(&self, now: Instant) -> Vec<u32> {
        let expired: Vec<(u32, PendingRequest)> = {
            let mut entries = self.lock();
            let ids: Vec<u32> = entries
                .iter()
                .filter(|(_, request)| request.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|request| (id, request)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(correlation_id, request)| {
                warn!("⏰ Request {} timed out", correlation_id);
                (request.completion)(Err(ClientError::RequestTimedOut { correlation_id }));
                correlation_id
            })
            .collect()
    }

    /// Fail every entry with the error produced by `error`
    pub fn fail_all(&self, error: impl Fn() -> ClientError) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, request)| request).collect();
        let count = drained.len();
        for request in drained {
            (request.completion)(Err(error()));
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, PendingRequest>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving end of a correlated request
#[derive(Debug)]
pub struct ResponseHandle<T> {
    correlation_id: u32,
    receiver: Receiver<Result<T>>,
}

impl<T> ResponseHandle<T> {
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// Block until the response, an expiry or a connection loss
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(ClientError::Stopped))
    }

    /// Like `wait`, but gives up locally after `timeout`
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ClientError::RequestTimedOut {
                correlation_id: self.correlation_id,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Stopped),
        }
    }

    /// Non-blocking check. `None` while the request is still in flight.
    pub fn try_get(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ClientError::Stopped)),
        }
    }
}

pub(crate) fn response_channel<T>(correlation_id: u32) -> (Sender<Result<T>>, ResponseHandle<T>) {
    let (sender, receiver) = channel::bounded(1);
    (
        sender,
        ResponseHandle {
            correlation_id,
            receiver,
        },
    )
}
