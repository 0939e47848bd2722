use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use tracing::trace;

use crate::models::record::Record;

/// Pending change notifications for the system file browser, keyed by item
/// identifier. Every batch runs under one write lock.
#[derive(Debug, Default)]
pub struct SignalQueue {
    inner: RwLock<SignalMaps>,
}

#[derive(Debug, Default)]
struct SignalMaps {
    changed: HashMap<String, Record>,
    deleted: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalSnapshot {
    pub changed: Vec<Record>,
    pub deleted: Vec<String>,
    /// Folder paths whose enumeration is stale.
    pub containers: BTreeSet<String>,
}

impl SignalSnapshot {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

pub struct SignalBatch<'a> {
    maps: &'a mut SignalMaps,
}

impl SignalBatch<'_> {
    pub fn changed(&mut self, record: &Record) {
        self.maps.deleted.remove(&record.identifier);
        self.maps
            .changed
            .insert(record.identifier.clone(), record.clone());
    }

    pub fn deleted(&mut self, record: &Record) {
        self.maps.changed.remove(&record.identifier);
        self.maps
            .deleted
            .insert(record.identifier.clone(), record.parent_path.clone());
    }

    pub fn forget(&mut self, identifier: &str) {
        self.maps.changed.remove(identifier);
        self.maps.deleted.remove(identifier);
    }
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch<F>(&self, update: F)
    where
        F: FnOnce(&mut SignalBatch<'_>),
    {
        let mut maps = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut batch = SignalBatch { maps: &mut maps };
        update(&mut batch);
    }

    pub fn signal_changed(&self, record: &Record) {
        self.batch(|b| b.changed(record));
    }

    pub fn signal_deleted(&self, record: &Record) {
        self.batch(|b| b.deleted(record));
    }

    pub fn pending(&self) -> (usize, usize) {
        let maps = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (maps.changed.len(), maps.deleted.len())
    }

    pub fn is_deleted(&self, identifier: &str) -> bool {
        let maps = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.deleted.contains_key(identifier)
    }

    pub fn changed_item(&self, identifier: &str) -> Option<Record> {
        let maps = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        maps.changed.get(identifier).cloned()
    }

    /// Takes everything queued so far, leaving the queue empty.
    pub fn drain(&self) -> SignalSnapshot {
        let mut maps = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let changed: HashMap<_, _> = std::mem::take(&mut maps.changed);
        let deleted: HashMap<_, _> = std::mem::take(&mut maps.deleted);
        drop(maps);

        let mut containers = BTreeSet::new();
        for record in changed.values() {
            containers.insert(record.parent_path.clone());
        }
        for parent in deleted.values() {
            containers.insert(parent.clone());
        }

        let mut changed: Vec<Record> = changed.into_values().collect();
        changed.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let mut deleted: Vec<String> = deleted.into_keys().collect();
        deleted.sort();

        trace!(
            changed = changed.len(),
            deleted = deleted.len(),
            "signal queue drained"
        );
        SignalSnapshot {
            changed,
            deleted,
            containers,
        }
    }
}
