//! Session-scoped registry of held WebDAV locks.
//!
//! Entries are keyed by the normalized lock root. Network round-trips never
//! run under a registry-wide lock: each root has its own async gate which
//! serializes acquire/refresh/release for that root only, while the map
//! itself is a `DashMap` that `find_affecting` can read without waiting on
//! in-flight requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::{DavError, Result};
use crate::exchange::{DavMethod, DavRequest, DavResponse, Exchange};
use crate::token::LockToken;
use crate::types::{LockRequest, LockTimeout};
use crate::uri::{combine, is_under_or_equal, normalize_for_compare, same_resource};
use crate::xml::{lockinfo_body, parse_lock_discovery};

/// One active lock.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldLock {
    pub root: Url,
    pub token: LockToken,
    /// Server-advised lifetime. Not enforced locally.
    pub timeout: Option<LockTimeout>,
    pub acquired_at: DateTime<Utc>,
}

/// Outcome of [`LockRegistry::acquire`].
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquireResult {
    /// The root was already locked by this session; nothing was sent.
    AlreadyHeld(LockToken),
    Acquired(LockToken),
    /// The server refused the lock, or granted one that does not cover
    /// the requested root. Nothing was recorded.
    Rejected { status: u16, reason: String },
}

impl LockAcquireResult {
    pub fn token(&self) -> Option<&LockToken> {
        match self {
            LockAcquireResult::AlreadyHeld(t) | LockAcquireResult::Acquired(t) => Some(t),
            LockAcquireResult::Rejected { .. } => None,
        }
    }
}

/// Outcome of [`LockRegistry::release`]. A failed UNLOCK is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReleaseResult {
    Released,
    NotHeld,
}

pub struct LockRegistry {
    exchange: Arc<dyn Exchange>,
    held: DashMap<String, HeldLock>,
    gates: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl LockRegistry {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            held: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    fn gate(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Gate for a root that is held or has an operation in flight. Nothing
    /// is created for a root the registry has never seen.
    fn existing_gate(&self, key: &str) -> Option<Arc<AsyncMutex<()>>> {
        if self.held.contains_key(key) {
            return Some(self.gate(key));
        }
        self.gates.get(key).map(|g| Arc::clone(g.value()))
    }

    /// Remove the gate of `key` once nothing is held under it and no other
    /// task still has a handle on it.
    fn retire_gate(&self, key: &str, gate: Arc<AsyncMutex<()>>) {
        drop(gate);
        self.gates
            .remove_if(key, |_, g| Arc::strong_count(g) == 1 && !self.held.contains_key(key));
    }

    /// Lock `root` unless this session already holds a lock on it.
    #[instrument(skip(self, root, request), level = "debug", fields(root = %root))]
    pub async fn acquire(&self, root: &Url, request: &LockRequest) -> Result<LockAcquireResult> {
        request.validate()?;

        let key = normalize_for_compare(root.as_str());
        let gate = self.gate(&key);
        let result = self.acquire_gated(&gate, &key, root, request).await;
        self.retire_gate(&key, gate);
        result
    }

    async fn acquire_gated(
        &self,
        gate: &AsyncMutex<()>,
        key: &str,
        root: &Url,
        request: &LockRequest,
    ) -> Result<LockAcquireResult> {
        let _guard = gate.lock().await;
        if let Some(held) = self.held.get(key) {
            debug!("Lock on {} already held", root);
            return Ok(LockAcquireResult::AlreadyHeld(held.token.clone()));
        }

        let mut req = DavRequest::new(DavMethod::Lock, root.clone())
            .header("Depth", request.depth.as_header());
        if let Some(timeout) = request.timeout {
            req = req.header("Timeout", timeout.to_string());
        }
        let response = self.exchange.send(req.xml_body(lockinfo_body(request))).await?;

        if !matches!(response.status, 200 | 201) {
            warn!("LOCK {} refused with status {}", root, response.status);
            return Ok(LockAcquireResult::Rejected {
                status: response.status,
                reason: format!("LOCK returned status {}", response.status),
            });
        }

        let Some((token, timeout)) = granted_lock(root, &response) else {
            warn!("LOCK {} succeeded but no active lock covers it", root);
            return Ok(LockAcquireResult::Rejected {
                status: response.status,
                reason: "no active lock in the reply matches the requested root".to_string(),
            });
        };

        match self.held.entry(key.to_string()) {
            Entry::Occupied(_) => Err(DavError::Contract(format!(
                "lock on {} inserted twice",
                root
            ))),
            Entry::Vacant(slot) => {
                slot.insert(HeldLock {
                    root: root.clone(),
                    token: token.clone(),
                    timeout,
                    acquired_at: Utc::now(),
                });
                info!("Acquired lock on {} ({})", root, token);
                Ok(LockAcquireResult::Acquired(token))
            }
        }
    }

    /// Token of the first held lock whose root is a prefix of `target`.
    ///
    /// Matching is plain prefix containment over an unordered map; with
    /// overlapping roots the match is not necessarily the most specific one.
    pub fn find_affecting(&self, target: &Url) -> Option<LockToken> {
        self.held
            .iter()
            .find(|entry| is_under_or_equal(entry.root.as_str(), target.as_str()))
            .map(|entry| entry.token.clone())
    }

    /// Extend a held lock. On success the entry's timeout (and token, if the
    /// server issued a different one) are replaced in place; on failure the
    /// entry is left as it was.
    #[instrument(skip(self, root), level = "debug", fields(root = %root))]
    pub async fn refresh(&self, root: &Url, timeout: Option<LockTimeout>) -> Result<LockToken> {
        let key = normalize_for_compare(root.as_str());
        let Some(gate) = self.existing_gate(&key) else {
            return Err(not_held(root));
        };
        let result = self.refresh_gated(&gate, &key, root, timeout).await;
        self.retire_gate(&key, gate);
        result
    }

    async fn refresh_gated(
        &self,
        gate: &AsyncMutex<()>,
        key: &str,
        root: &Url,
        timeout: Option<LockTimeout>,
    ) -> Result<LockToken> {
        let _guard = gate.lock().await;
        let (lock_root, token) = self
            .held
            .get(key)
            .map(|h| (h.root.clone(), h.token.clone()))
            .ok_or_else(|| not_held(root))?;

        let mut req = DavRequest::new(DavMethod::Lock, lock_root.clone())
            .header("If", token.if_value());
        if let Some(timeout) = timeout {
            req = req.header("Timeout", timeout.to_string());
        }
        let response = self
            .exchange
            .send(req)
            .await?
            .expect_status(DavMethod::Lock, &lock_root, &[200])?;

        let (new_token, new_timeout) = match granted_lock(&lock_root, &response) {
            Some(granted) => granted,
            None => (token.clone(), response.header("Timeout").and_then(LockTimeout::parse)),
        };

        if let Some(mut held) = self.held.get_mut(key) {
            if held.token != new_token {
                debug!("Server replaced lock token on {}", lock_root);
                held.token = new_token.clone();
            }
            if new_timeout.is_some() {
                held.timeout = new_timeout;
            }
        }
        debug!("Refreshed lock on {}", lock_root);
        Ok(new_token)
    }

    /// Unlock `root`. If the UNLOCK fails, or this future is dropped before
    /// it completes, the entry is put back so the token is not lost.
    #[instrument(skip(self, root), level = "debug", fields(root = %root))]
    pub async fn release(&self, root: &Url) -> Result<LockReleaseResult> {
        let key = normalize_for_compare(root.as_str());
        let Some(gate) = self.existing_gate(&key) else {
            return Ok(LockReleaseResult::NotHeld);
        };
        let result = self.release_gated(&gate, &key).await;
        self.retire_gate(&key, gate);
        result
    }

    /// The gate is taken before the restore guard exists, so a cancelled
    /// release reinserts the entry while the gate is still held.
    async fn release_gated(&self, gate: &AsyncMutex<()>, key: &str) -> Result<LockReleaseResult> {
        let _guard = gate.lock().await;
        let Some((_, held)) = self.held.remove(key) else {
            return Ok(LockReleaseResult::NotHeld);
        };
        let lock_root = held.root.clone();
        let req = DavRequest::new(DavMethod::Unlock, lock_root.clone())
            .header("Lock-Token", held.token.header_value());
        let restore = Restore {
            held: &self.held,
            key: key.to_string(),
            lock: Some(held),
        };

        let outcome = self.exchange.send(req).await.and_then(|response| {
            response.expect_status(DavMethod::Unlock, &lock_root, &[200, 204])
        });
        match outcome {
            Ok(_) => {
                restore.disarm();
                info!("Released lock on {}", lock_root);
                Ok(LockReleaseResult::Released)
            }
            Err(e) => {
                drop(restore);
                Err(DavError::UnlockFailed {
                    root: lock_root.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Drop every held lock rooted at or below `target` (whole path segments
    /// only) without sending anything. For locks the server destroyed along
    /// with their resource (DELETE, or the source of a MOVE). Returns how
    /// many were dropped.
    #[instrument(skip(self, target), level = "debug", fields(target = %target))]
    pub async fn forget(&self, target: &Url) -> usize {
        let removed = normalize_for_compare(target.as_str());
        let keys: Vec<String> = self
            .held
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| {
                key.strip_prefix(removed.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .collect();

        let mut forgotten = 0;
        for key in keys {
            let gate = self.gate(&key);
            {
                let _guard = gate.lock().await;
                if let Some((_, held)) = self.held.remove(&key) {
                    debug!("Forgot lock on {} ({})", held.root, held.token);
                    forgotten += 1;
                }
            }
            self.retire_gate(&key, gate);
        }
        forgotten
    }

    /// Unlock everything, best effort. Failures are logged and the
    /// corresponding entries stay registered. Returns how many were released.
    pub async fn drain_all(&self) -> usize {
        let roots: Vec<Url> = self.held.iter().map(|e| e.root.clone()).collect();
        if roots.is_empty() {
            return 0;
        }
        debug!("Draining {} held locks", roots.len());

        let results = join_all(roots.iter().map(|root| self.release(root))).await;
        let mut released = 0;
        for (root, result) in roots.iter().zip(results) {
            match result {
                Ok(LockReleaseResult::Released) => released += 1,
                Ok(LockReleaseResult::NotHeld) => {}
                Err(e) => warn!("Failed to release lock on {} during drain: {}", root, e),
            }
        }
        released
    }

    /// Point-in-time copy of the held locks.
    pub fn held_locks(&self) -> Vec<HeldLock> {
        self.held.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_held(&self, root: &Url) -> bool {
        self.held.contains_key(&normalize_for_compare(root.as_str()))
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

fn not_held(root: &Url) -> DavError {
    DavError::InvalidInput(format!("No lock held on {}", root))
}

/// Puts a removed entry back unless disarmed.
struct Restore<'a> {
    held: &'a DashMap<String, HeldLock>,
    key: String,
    lock: Option<HeldLock>,
}

impl Restore<'_> {
    fn disarm(mut self) {
        self.lock = None;
    }
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match self.held.entry(self.key.clone()) {
            Entry::Vacant(slot) => {
                warn!("Unlock of {} did not complete, keeping lock", lock.root);
                slot.insert(lock);
            }
            Entry::Occupied(_) => {
                error!("Lock on {} re-registered while its unlock was pending", lock.root);
            }
        }
    }
}

/// Pick the lock granted for `root` out of a LOCK reply.
///
/// An `activelock` matches when its `lockroot` resolves to `root` with or
/// without a trailing slash. Servers that omit `lockroot` are matched on the
/// `Lock-Token` response header instead.
fn granted_lock(root: &Url, response: &DavResponse) -> Option<(LockToken, Option<LockTimeout>)> {
    let header_token = response.header("Lock-Token").and_then(LockToken::parse_header);
    let body = response.text().ok().filter(|b| !b.trim().is_empty())?;
    let locks = match parse_lock_discovery(body) {
        Ok(locks) => locks,
        Err(e) => {
            debug!("Unreadable lockdiscovery for {}: {}", root, e);
            return None;
        }
    };

    locks.into_iter().find_map(|lock| {
        let covers_root = match &lock.root {
            Some(href) => combine(root, href, false)
                .map(|resolved| same_resource(resolved.as_str(), root.as_str()))
                .unwrap_or(false),
            None => header_token.is_some() && lock.token == header_token,
        };
        if !covers_root {
            return None;
        }
        let token = lock.token.or_else(|| header_token.clone())?;
        Some((token, lock.timeout))
    })
}
