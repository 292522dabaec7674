//! Per-source ingest statistics and hour/day bucketing.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Event;

/// Streaming stats for one source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
  pub count: u64,
  pub first_seen: DateTime<Utc>,
  pub last_seen: DateTime<Utc>,
  pub event_types: BTreeSet<String>,
}

impl SourceStats {
  pub fn new(ts: DateTime<Utc>) -> Self {
    Self {
      count: 0,
      first_seen: ts,
      last_seen: ts,
      event_types: BTreeSet::new(),
    }
  }

  /// Fold one ingested event into the stats.
  pub fn record(&mut self, event: &Event) {
    self.count += 1;
    if event.timestamp < self.first_seen {
      self.first_seen = event.timestamp;
    }
    if event.timestamp > self.last_seen {
      self.last_seen = event.timestamp;
    }
    if !self.event_types.contains(&event.event_type) {
      self.event_types.insert(event.event_type.clone());
    }
  }
}

/// Hour of day (0..24) in the given offset.
pub fn hour_bucket(ts: &DateTime<Utc>, offset: &FixedOffset) -> u32 {
  ts.with_timezone(offset).hour()
}

/// Day of week, Monday = 0, in the given offset.
pub fn weekday_bucket(ts: &DateTime<Utc>, offset: &FixedOffset) -> u32 {
  ts.with_timezone(offset).weekday().num_days_from_monday()
}
