//! Last-known liveness per host, merged cycle by cycle.
//!
//! Absence of an entry means "never probed" — the REST layer renders
//! that as `unknown`, never as a defaulted boolean.

use crate::models::HostId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
pub struct StatusEntry {
    pub online: bool,
    pub checked_at: OffsetDateTime,
}

#[derive(Default)]
pub struct StatusCache {
    entries: Mutex<HashMap<HostId, StatusEntry>>,
}

pub type SharedStatusCache = Arc<StatusCache>;

impl StatusCache {
    pub fn new() -> SharedStatusCache {
        Arc::new(Self::default())
    }

    /// Merges one probe cycle's results. Hosts absent from `results`
    /// (e.g. removed mid-cycle) keep their previous entry untouched.
    pub fn update(&self, results: HashMap<HostId, bool>) {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        for (host_id, online) in results {
            entries.insert(host_id, StatusEntry { online, checked_at: now });
        }
    }

    /// `None` means the host was never probed.
    pub fn get(&self, host_id: HostId) -> Option<bool> {
        self.entries.lock().get(&host_id).map(|e| e.online)
    }

    pub fn entry(&self, host_id: HostId) -> Option<StatusEntry> {
        self.entries.lock().get(&host_id).copied()
    }

    pub fn snapshot(&self) -> HashMap<HostId, StatusEntry> {
        self.entries.lock().clone()
    }

    /// Eviction happens only on explicit host removal; the cache never
    /// expires entries on its own.
    pub fn remove(&self, host_id: HostId) {
        self.entries.lock().remove(&host_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
