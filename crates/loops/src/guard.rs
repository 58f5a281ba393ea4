//! Overlap guards — at most one in-flight run per loop id.
//!
//! [`InMemoryGuard`] is a process-local set. [`LeaseGuard`] holds a
//! TTL-bound fencing lease in the store, renewed while the run is in
//! flight, so the exclusion holds across processes sharing that store.

use crate::error::Result;
use crate::keys;
use async_trait::async_trait;
use cadence_core::store::KvStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Proof of exclusive ownership of a loop id.
///
/// Dropping a handle without releasing it runs the guard's synchronous
/// cleanup, so a panicking run cannot wedge its loop.
pub struct GuardHandle {
    loop_id: String,
    token: String,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl GuardHandle {
    fn new(
        loop_id: &str,
        token: String,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            loop_id: loop_id.to_string(),
            token,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn loop_id(&self) -> &str {
        &self.loop_id
    }

    /// The ownership token (lease value for store-backed guards).
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for GuardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardHandle")
            .field("loop_id", &self.loop_id)
            .field("token", &self.token)
            .finish()
    }
}

#[async_trait]
pub trait OverlapGuard: Send + Sync {
    /// A short name for logs (e.g., "memory", "lease").
    fn name(&self) -> &str;

    /// Claim `loop_id`. `Ok(None)` when another run already holds it.
    async fn try_acquire(&self, loop_id: &str) -> Result<Option<GuardHandle>>;

    /// Give the claim back. Never fails; problems are logged.
    async fn release(&self, handle: GuardHandle);
}

// ── In-memory set ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, loop_id: &str) -> bool {
        lock(&self.active).contains(loop_id)
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl OverlapGuard for InMemoryGuard {
    fn name(&self) -> &str {
        "memory"
    }

    async fn try_acquire(&self, loop_id: &str) -> Result<Option<GuardHandle>> {
        if !lock(&self.active).insert(loop_id.to_string()) {
            return Ok(None);
        }
        let active = self.active.clone();
        let id = loop_id.to_string();
        Ok(Some(GuardHandle::new(loop_id, loop_id.to_string(), move || {
            lock(&active).remove(&id);
        })))
    }

    async fn release(&self, handle: GuardHandle) {
        drop(handle);
    }
}

// ── Store-backed fencing lease ────────────────────────────────────────────

pub struct LeaseGuard {
    store: Arc<dyn KvStore>,
    owner: String,
    ttl: Duration,
}

impl LeaseGuard {
    /// A lease guard owned by a fresh process identity.
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self::with_owner(store, ttl, Uuid::new_v4().to_string())
    }

    pub fn with_owner(store: Arc<dyn KvStore>, ttl: Duration, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
            ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl OverlapGuard for LeaseGuard {
    fn name(&self) -> &str {
        "lease"
    }

    async fn try_acquire(&self, loop_id: &str) -> Result<Option<GuardHandle>> {
        let key = keys::lease(loop_id);
        let token = format!("{}:{loop_id}", self.owner);
        if !self.store.set_if_absent(&key, &token, self.ttl).await? {
            debug!(loop_id, "Lease held elsewhere");
            return Ok(None);
        }

        let renewal = tokio::spawn(renew(
            self.store.clone(),
            key,
            token.clone(),
            self.ttl,
        ));
        Ok(Some(GuardHandle::new(loop_id, token, move || {
            renewal.abort();
        })))
    }

    async fn release(&self, handle: GuardHandle) {
        let key = keys::lease(handle.loop_id());
        let token = handle.token().to_string();
        let loop_id = handle.loop_id().to_string();
        // Stop renewing before giving the lease up
        drop(handle);
        match self.store.del_if_equals(&key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(loop_id = %loop_id, "Lease already lost before release"),
            Err(e) => warn!(loop_id = %loop_id, error = %e, "Lease release failed; it will expire"),
        }
    }
}

/// Push the lease TTL out every third of its length until ownership is lost.
async fn renew(store: Arc<dyn KvStore>, key: String, token: String, ttl: Duration) {
    let period = (ttl / 3).max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        match store.expire_if_equals(&key, &token, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(key = %key, "Lease lost while run in flight");
                return;
            }
            Err(e) => warn!(key = %key, error = %e, "Lease renewal failed"),
        }
    }
}
