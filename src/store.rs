//! Concurrency-safe resource store keyed by absolute URL.
//!
//! Writers first claim a URL with [`ResourceStore::try_reserve`], do their
//! (slow) body retrieval off the map, then publish with [`ResourceStore::put`].
//! Reservation is a single check-and-set on the shard, so two events for the
//! same URL can never both win.

use crate::types::Resource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of one URL key.
#[derive(Debug, Clone)]
enum Slot {
    /// Claimed by a capture task; body not yet retrieved.
    Reserved,
    /// Fully populated.
    Captured(Resource),
}

/// Shared mapping from URL to captured [`Resource`].
#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    slots: Arc<DashMap<String, Slot>>,
    closed: Arc<AtomicBool>,
}

impl ResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `url` for capture.
    ///
    /// Returns `true` exactly once per URL; every later call (or any call
    /// after [`close`](Self::close)) returns `false`.
    pub fn try_reserve(&self, url: &str) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        match self.slots.entry(url.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Reserved);
                true
            }
        }
    }

    /// Insert or overwrite the final resource for `url`.
    pub fn put(&self, url: &str, resource: Resource) {
        self.slots.insert(url.to_string(), Slot::Captured(resource));
    }

    /// Insert every resource keyed by its own URL, last write wins.
    pub fn extend<I>(&self, resources: I)
    where
        I: IntoIterator<Item = Resource>,
    {
        for resource in resources {
            let url = resource.url.clone();
            self.put(&url, resource);
        }
    }

    /// Stop accepting new reservations. Already reserved URLs may still be `put`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Independent copy of every fully captured resource.
    ///
    /// URLs that are reserved but not yet populated are not included.
    pub fn snapshot(&self) -> HashMap<String, Resource> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Captured(resource) => Some((entry.key().clone(), resource.clone())),
                Slot::Reserved => None,
            })
            .collect()
    }

    /// Number of keys, reserved or captured.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of fully captured resources.
    pub fn captured_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Captured(_)))
            .count()
    }
}
