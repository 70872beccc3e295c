//! Remote mirror of the local state: seeding, change subscription and
//! write-serialization against a hosted path-addressed document store.
//!
//! The hosted store itself is an external collaborator behind the
//! `RemoteStore` trait (point read, full-document replace, change counter).
//! The built-in `MemoryRemote` backs tests and the loopback configuration;
//! real deployments install their own implementation. Writes per scope go
//! through an explicit FIFO queue with at most one write in flight, so a
//! half-applied pair of documents can never interleave with the next write.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::cache::CacheDb;
use crate::codec;
use crate::model::CanonicalState;
use crate::scope::Scope;

pub const ROOT_PATH: &str = "rollbook";

/// A remote operation failure, always carrying the path it was aimed at so
/// the caller can report it and fall back to local-only operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub path: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> RemoteError {
        RemoteError {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote operation failed at {}: {}", self.path, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// No remote backend installed; callers continue local-only.
    NotConfigured,
    Remote(RemoteError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotConfigured => write!(f, "remote backend is not configured"),
            SyncError::Remote(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> SyncError {
        SyncError::Remote(e)
    }
}

/// Hierarchical path-addressed document store. `revision` is a per-path
/// change counter (0 = never written) that stands in for push notifications:
/// the gateway polls it to detect changes.
pub trait RemoteStore {
    fn read(&self, path: &str) -> Result<Option<Value>, RemoteError>;
    fn write(&mut self, path: &str, value: &Value) -> Result<(), RemoteError>;
    fn revision(&self, path: &str) -> u64;
}

/// In-memory backend for tests and the loopback `sync.configure` mode.
#[derive(Default)]
pub struct MemoryRemote {
    docs: HashMap<String, (Value, u64)>,
}

impl MemoryRemote {
    pub fn new() -> MemoryRemote {
        MemoryRemote::default()
    }
}

impl RemoteStore for MemoryRemote {
    fn read(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        Ok(self.docs.get(path).map(|(v, _)| v.clone()))
    }

    fn write(&mut self, path: &str, value: &Value) -> Result<(), RemoteError> {
        let next_rev = self.docs.get(path).map(|(_, r)| r + 1).unwrap_or(1);
        self.docs
            .insert(path.to_string(), (value.clone(), next_rev));
        Ok(())
    }

    fn revision(&self, path: &str) -> u64 {
        self.docs.get(path).map(|(_, r)| *r).unwrap_or(0)
    }
}

struct PendingWrite {
    path: String,
    value: Value,
}

#[derive(Default)]
struct ScopeQueue {
    queue: VecDeque<PendingWrite>,
    in_flight: bool,
}

struct Subscription {
    scope: Scope,
    cohort_path: String,
    teachers_path: String,
    seen_cohort: Option<u64>,
    seen_teachers: Option<u64>,
}

pub struct SyncGateway {
    store: Option<Box<dyn RemoteStore>>,
    queues: HashMap<String, ScopeQueue>,
    subscription: Option<Subscription>,
    last_error: Option<RemoteError>,
}

impl SyncGateway {
    pub fn new() -> SyncGateway {
        SyncGateway {
            store: None,
            queues: HashMap::new(),
            subscription: None,
            last_error: None,
        }
    }

    pub fn configure(&mut self, store: Box<dyn RemoteStore>) {
        self.store = Some(store);
        self.last_error = None;
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn store_mut(&mut self) -> Option<&mut (dyn RemoteStore + '_)> {
        self.store.as_deref_mut().map(|s| s as &mut dyn RemoteStore)
    }

    pub fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }

    pub fn pending_writes(&self) -> usize {
        self.queues.values().map(|q| q.queue.len()).sum()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    fn queue_key(scope: &Scope) -> String {
        format!("{}/{}", scope.group_id, scope.cohort_year)
    }

    /// Seeds the scope's remote documents when absent. Check-then-set:
    /// existing remote data is never overwritten (last-writer-wins is the
    /// accepted model for the race this leaves open).
    pub fn ensure_remote_exists(
        &mut self,
        scope: &Scope,
        seed: &CanonicalState,
    ) -> Result<bool, SyncError> {
        let result = self.ensure_inner(scope, seed);
        if let Err(SyncError::Remote(e)) = &result {
            self.last_error = Some(e.clone());
        }
        result
    }

    fn ensure_inner(&mut self, scope: &Scope, seed: &CanonicalState) -> Result<bool, SyncError> {
        let store = self.store.as_deref_mut().ok_or(SyncError::NotConfigured)?;
        if !scope.has_cohort() {
            return Ok(false);
        }

        let cohort_path = scope.cohort_path(ROOT_PATH);
        let teachers_path = scope.teachers_path(ROOT_PATH);
        let mut seeded = false;

        if store.read(&cohort_path)?.is_none() {
            let doc = codec::cohort_document(seed, scope);
            store.write(&cohort_path, &doc)?;
            seeded = true;
        }
        if store.read(&teachers_path)?.is_none() {
            let doc = codec::teachers_document(seed, scope);
            store.write(&teachers_path, &doc)?;
            seeded = true;
        }
        Ok(seeded)
    }

    /// Watches the scope's cohort document and the group's teachers
    /// document. Replaces any previous subscription; the first poll after
    /// this delivers the current remote value.
    pub fn subscribe(&mut self, scope: &Scope) -> Result<(), SyncError> {
        if self.store.is_none() {
            return Err(SyncError::NotConfigured);
        }
        self.unsubscribe();
        self.subscription = Some(Subscription {
            scope: scope.clone(),
            cohort_path: scope.cohort_path(ROOT_PATH),
            teachers_path: scope.teachers_path(ROOT_PATH),
            seen_cohort: None,
            seen_teachers: None,
        });
        Ok(())
    }

    /// Idempotent; safe to call with no active subscription.
    pub fn unsubscribe(&mut self) {
        self.subscription = None;
    }

    /// Drains remote changes since the last poll. A state is delivered when
    /// either watched path changed (or on the first poll after subscribing),
    /// merged across both paths, decoded, and mirrored into the local cache
    /// before being returned.
    pub fn poll(&mut self, cache: Option<&CacheDb>) -> Result<Vec<CanonicalState>, SyncError> {
        let result = self.poll_inner(cache);
        if let Err(SyncError::Remote(e)) = &result {
            self.last_error = Some(e.clone());
        }
        result
    }

    fn poll_inner(&mut self, cache: Option<&CacheDb>) -> Result<Vec<CanonicalState>, SyncError> {
        let Some(sub) = self.subscription.as_mut() else {
            return Ok(Vec::new());
        };
        let store = self.store.as_deref().ok_or(SyncError::NotConfigured)?;

        let cohort_rev = store.revision(&sub.cohort_path);
        let teachers_rev = store.revision(&sub.teachers_path);
        let changed = sub.seen_cohort != Some(cohort_rev) || sub.seen_teachers != Some(teachers_rev);
        if !changed {
            return Ok(Vec::new());
        }

        let cohort_doc = store
            .read(&sub.cohort_path)
            .map_err(SyncError::Remote)?;
        let teachers_doc = store
            .read(&sub.teachers_path)
            .map_err(SyncError::Remote)?;
        sub.seen_cohort = Some(cohort_rev);
        sub.seen_teachers = Some(teachers_rev);

        // Nothing remote yet: skip rather than clobber local data with an
        // empty decode.
        if cohort_doc.is_none() && teachers_doc.is_none() {
            return Ok(Vec::new());
        }

        let merged = codec::merge_documents(cohort_doc.as_ref(), teachers_doc.as_ref());
        let state = codec::decode(&merged, &sub.scope);
        if let Some(cache) = cache {
            if let Err(e) = cache.write_state(&sub.scope, &state) {
                // Local mirror failure is not a remote failure; the decoded
                // state still reaches the caller.
                self.last_error = Some(RemoteError::new(
                    sub.cohort_path.clone(),
                    format!("local cache mirror failed: {}", e),
                ));
            }
        }
        Ok(vec![state])
    }

    /// Enqueues the scope's two documents and drains the scope's queue.
    /// Within a scope, writes apply strictly in submission order and at most
    /// one is in flight; queues of different scopes are independent. The
    /// first failure encountered while draining is recorded and returned;
    /// the queue still proceeds to later writes.
    pub fn write(&mut self, scope: &Scope, state: &CanonicalState) -> Result<(), SyncError> {
        if self.store.is_none() {
            return Err(SyncError::NotConfigured);
        }
        // An invalid scope has nowhere to write; callers stay local-only.
        if !scope.has_cohort() {
            return Ok(());
        }

        let cohort = PendingWrite {
            path: scope.cohort_path(ROOT_PATH),
            value: codec::cohort_document(state, scope),
        };
        let teachers = PendingWrite {
            path: scope.teachers_path(ROOT_PATH),
            value: codec::teachers_document(state, scope),
        };
        let key = Self::queue_key(scope);
        let q = self.queues.entry(key.clone()).or_default();
        q.queue.push_back(cohort);
        q.queue.push_back(teachers);

        match self.pump(&key) {
            None => Ok(()),
            Some(e) => {
                self.last_error = Some(e.clone());
                Err(SyncError::Remote(e))
            }
        }
    }

    fn pump(&mut self, key: &str) -> Option<RemoteError> {
        let mut first_error: Option<RemoteError> = None;
        loop {
            let next = {
                let Some(q) = self.queues.get_mut(key) else {
                    return first_error;
                };
                if q.in_flight {
                    // Another drain of this scope is already running; it
                    // will pick up what we enqueued.
                    return first_error;
                }
                match q.queue.pop_front() {
                    Some(w) => {
                        q.in_flight = true;
                        w
                    }
                    None => return first_error,
                }
            };

            let result = match self.store.as_deref_mut() {
                Some(store) => store.write(&next.path, &next.value),
                None => Err(RemoteError::new(next.path.clone(), "backend removed")),
            };

            // Success or failure, the write has settled; release the slot
            // before the next one begins.
            if let Some(q) = self.queues.get_mut(key) {
                q.in_flight = false;
            }
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
}

impl Default for SyncGateway {
    fn default() -> Self {
        SyncGateway::new()
    }
}
