//! An internal vault cell, which holds a resource and records when the vault became its only holder.
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies an entry within one vault.
///
/// Ids come from a counter owned by the vault, so ids from two different vaults are unrelated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntryId(pub(crate) u64);

impl EntryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Entry<T> {
    pub(crate) id: EntryId,
    pub(crate) resource: Arc<T>,
    /// `None` while something outside the vault holds the resource.
    pub(crate) idle_since: Option<Instant>,
}

impl<T> Entry<T> {
    pub(crate) fn new(id: EntryId, resource: Arc<T>) -> Entry<T> {
        Entry {
            id,
            resource,
            idle_since: None,
        }
    }

    /// Hand out a new strong handle, marking the entry as wanted again.
    pub(crate) fn acquire(&mut self) -> Arc<T> {
        self.idle_since = None;
        self.resource.clone()
    }

    /// Is the vault the only thing holding this resource?
    pub(crate) fn is_sole_held(&self) -> bool {
        Arc::strong_count(&self.resource) == 1
    }

    /// How long the entry has been idle as of `now`, if it is idle at all.
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.idle_since
            .map(|since| now.saturating_duration_since(since))
    }
}
