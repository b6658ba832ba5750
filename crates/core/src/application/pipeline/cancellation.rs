// Cooperative cancellation

use crate::application::worker::constants::PENDING_CANCEL_TTL;
use crate::domain::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared flag checked by a run between stages
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Entries {
    flags: HashMap<RequestId, CancelFlag>,
    /// Cancels that arrived before their run registered
    pending: HashMap<RequestId, Instant>,
}

impl Entries {
    fn take_pending(&mut self, request_id: &str, ttl: Duration) -> bool {
        self.pending
            .remove(request_id)
            .is_some_and(|at| at.elapsed() < ttl)
    }

    fn prune(&mut self, ttl: Duration) {
        self.pending.retain(|_, at| at.elapsed() < ttl);
    }
}

/// Flags of the runs executing in this process
pub struct CancellationRegistry {
    entries: Mutex<Entries>,
    pending_ttl: Duration,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::with_pending_ttl(PENDING_CANCEL_TTL)
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_ttl(pending_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            pending_ttl,
        }
    }

    /// Flag for `request_id`, created on first use
    ///
    /// A cancel recorded within the pending TTL before this call comes back
    /// already set, so the run stops at its first checkpoint.
    pub fn register(&self, request_id: &str) -> CancelFlag {
        let mut entries = self.lock();
        let cancelled = entries.take_pending(request_id, self.pending_ttl);
        let flag = entries
            .flags
            .entry(request_id.to_string())
            .or_default()
            .clone();
        if cancelled {
            flag.cancel();
        }
        flag
    }

    /// Like `register`, but `None` if a run is already registered under the ID
    pub fn try_register(&self, request_id: &str) -> Option<CancelFlag> {
        let mut entries = self.lock();
        if entries.flags.contains_key(request_id) {
            return None;
        }
        let cancelled = entries.take_pending(request_id, self.pending_ttl);
        let flag = CancelFlag::new();
        if cancelled {
            flag.cancel();
        }
        entries.flags.insert(request_id.to_string(), flag.clone());
        Some(flag)
    }

    /// Returns true if a run with this ID is tracked here
    ///
    /// Otherwise the cancel is remembered for the pending TTL in case the
    /// run is about to register.
    pub fn cancel(&self, request_id: &str) -> bool {
        let mut entries = self.lock();
        if let Some(flag) = entries.flags.get(request_id) {
            flag.cancel();
            return true;
        }
        entries.prune(self.pending_ttl);
        entries
            .pending
            .insert(request_id.to_string(), Instant::now());
        false
    }

    pub fn remove(&self, request_id: &str) {
        self.lock().flags.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.lock().flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
