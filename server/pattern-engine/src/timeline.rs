//! In-memory event store and the chronological timeline derived from it.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::types::Event;

#[derive(Debug, Clone)]
struct StoredEvent {
  event: Event,
  /// Insertion order; breaks timestamp ties.
  seq: u64,
}

/// All known events keyed by id. Insertion is idempotent by id.
#[derive(Debug, Default)]
pub struct EventStore {
  events: HashMap<String, StoredEvent>,
  next_seq: u64,
}

impl EventStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert an event. Returns false (and keeps the original) if the id is already known.
  pub fn insert(&mut self, event: Event) -> bool {
    if self.events.contains_key(&event.id) {
      return false;
    }
    let seq = self.next_seq;
    self.next_seq += 1;
    self.events.insert(event.id.clone(), StoredEvent { event, seq });
    true
  }

  pub fn get(&self, id: &str) -> Option<&Event> {
    self.events.get(id).map(|s| &s.event)
  }

  pub fn contains(&self, id: &str) -> bool {
    self.events.contains_key(id)
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
    self.events.values().map(|s| s.event.timestamp).max()
  }

  /// Drop events older than `retention` before the newest event, then the
  /// oldest until at most `max_events` remain. Returns how many were dropped.
  pub fn evict(&mut self, retention: Duration, max_events: usize) -> usize {
    let before = self.events.len();
    if let Some(newest) = self.newest_timestamp() {
      let cutoff = newest - retention;
      self.events.retain(|_, s| s.event.timestamp >= cutoff);
    }

    if self.events.len() > max_events {
      let excess = self.events.len() - max_events;
      let mut order = self.ordered();
      order.truncate(excess);
      let doomed: Vec<String> = order.into_iter().map(|(_, _, id)| id).collect();
      for id in doomed {
        self.events.remove(&id);
      }
    }

    before - self.events.len()
  }

  fn ordered(&self) -> Vec<(DateTime<Utc>, u64, String)> {
    let mut order: Vec<(DateTime<Utc>, u64, String)> = self
      .events
      .values()
      .map(|s| (s.event.timestamp, s.seq, s.event.id.clone()))
      .collect();
    order.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    order
  }
}

/// Event ids ordered by (timestamp, insertion order). Rebuilt once per cycle.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
  ids: Vec<String>,
}

impl Timeline {
  pub fn rebuild(store: &EventStore) -> Self {
    Self {
      ids: store.ordered().into_iter().map(|(_, _, id)| id).collect(),
    }
  }

  pub fn ids(&self) -> &[String] {
    &self.ids
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Resolve the ordered ids against the store.
  pub fn events<'a>(&self, store: &'a EventStore) -> Vec<&'a Event> {
    self.ids.iter().filter_map(|id| store.get(id)).collect()
  }
}
