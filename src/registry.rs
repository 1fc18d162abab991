//! Pending-request bookkeeping for response correlation

use crate::data::{Params, PendingRequest, RequestId};
use crate::error::RegistryError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Map from request id to the request waiting on it
#[derive(Debug, Default)]
pub struct RequestRegistry {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request. Fails if its id is already pending.
    pub fn insert(&self, request: PendingRequest) -> Result<(), RegistryError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&request.id) {
            return Err(RegistryError::DuplicateRequestId(request.id));
        }

        tracing::debug!("Registered request {} ({})", request.id, request.method);
        pending.insert(request.id.clone(), request);
        Ok(())
    }

    /// Convenience wrapper around [`insert`](Self::insert)
    pub fn register(&self, id: RequestId, method: &str, params: Params) -> Result<(), RegistryError> {
        self.insert(PendingRequest::new(id, method, params))
    }

    /// Remove and return the request with `id`
    pub fn pop(&self, id: &RequestId) -> Result<PendingRequest, RegistryError> {
        self.pending
            .lock()
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownRequestId(id.clone()))
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn get(&self, id: &RequestId) -> Option<PendingRequest> {
        self.pending.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop requests that have waited longer than `ttl` and return them, oldest first
    pub fn evict_expired(&self, ttl: Duration) -> Vec<PendingRequest> {
        let now = Utc::now();
        let mut pending = self.pending.lock();

        let expired: Vec<RequestId> = pending
            .values()
            .filter(|request| request.age(now) > ttl)
            .map(|request| request.id.clone())
            .collect();

        let mut evicted: Vec<PendingRequest> = expired
            .iter()
            .filter_map(|id| pending.remove(id))
            .collect();
        evicted.sort_by_key(|request| request.submitted_at);

        if !evicted.is_empty() {
            tracing::warn!(
                "Evicted {} pending request(s) older than {:?}, {} still pending",
                evicted.len(),
                ttl,
                pending.len()
            );
        }
        evicted
    }
}

/// Generates request ids from the wall clock at 100µs resolution
///
/// Ids are strictly increasing: a tick that is not ahead of the last issued
/// id is bumped to `last + 1`.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> RequestId {
        let tick = Utc::now().timestamp_micros() / 100;
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(if tick > last { tick } else { last + 1 })
            })
            .unwrap_or_else(|last| last);

        RequestId::Int(if tick > previous { tick } else { previous + 1 })
    }
}
