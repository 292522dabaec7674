//! Event collection: fetch new raw records per source and merge them.
//!
//! Fetches run concurrently, each bounded by a cap and a timeout. The merge
//! into the analysis state is a single-writer step done afterwards in source
//! registration order. A failing source is logged and skipped.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::EngineError;
use crate::normalize;
use crate::state::AnalysisState;
use crate::stats::SourceStats;
use crate::types::{RawRecord, SourceType};

/// Fetch contract for one upstream source.
#[async_trait]
pub trait EventSource: Send + Sync {
  fn source_type(&self) -> SourceType;

  /// Unique name; watermarks and stats are keyed by it.
  fn name(&self) -> &str {
    self.source_type().as_str()
  }

  /// Up to `cap` records with timestamp strictly after `watermark`, ascending.
  async fn fetch(&self, watermark: Option<DateTime<Utc>>, cap: usize) -> Result<Vec<RawRecord>, EngineError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectReport {
  pub new_events: usize,
  pub evicted_events: usize,
  pub failed_sources: Vec<String>,
}

pub struct Collector {
  sources: Vec<Arc<dyn EventSource>>,
  watermarks: BTreeMap<String, DateTime<Utc>>,
}

impl Collector {
  pub fn new() -> Self {
    Self {
      sources: Vec::new(),
      watermarks: BTreeMap::new(),
    }
  }

  pub fn register(&mut self, source: Arc<dyn EventSource>) {
    self.sources.push(source);
  }

  pub fn watermarks(&self) -> &BTreeMap<String, DateTime<Utc>> {
    &self.watermarks
  }

  pub fn restore_watermarks(&mut self, watermarks: BTreeMap<String, DateTime<Utc>>) {
    self.watermarks = watermarks;
  }

  pub fn source_names(&self) -> Vec<String> {
    self.sources.iter().map(|s| s.name().to_string()).collect()
  }

  /// Fetch every source concurrently. Results come back in registration order.
  async fn fetch_all(&self, cap: usize, timeout_ms: u64) -> Vec<(usize, Result<Vec<RawRecord>, EngineError>)> {
    let timeout = std::time::Duration::from_millis(timeout_ms);
    let mut set = JoinSet::new();
    for (idx, source) in self.sources.iter().enumerate() {
      let source = Arc::clone(source);
      let watermark = self.watermarks.get(source.name()).copied();
      set.spawn(async move {
        let result = match tokio::time::timeout(timeout, source.fetch(watermark, cap)).await {
          Ok(result) => result,
          Err(_) => Err(EngineError::Timeout {
            source_name: source.name().to_string(),
            after_ms: timeout_ms,
          }),
        };
        (idx, result)
      });
    }

    let mut results = Vec::with_capacity(self.sources.len());
    while let Some(joined) = set.join_next().await {
      match joined {
        Ok(r) => results.push(r),
        Err(e) => tracing::warn!(error = %e, "source fetch task aborted"),
      }
    }
    results.sort_by_key(|(idx, _)| *idx);
    results
  }

  /// Collect new events from all sources into `state`.
  pub async fn collect(&mut self, state: &mut AnalysisState, max_per_source: usize, config: &Config) -> CollectReport {
    let mut report = CollectReport::default();
    let fetched = self.fetch_all(max_per_source, config.fetch_timeout_ms).await;
    let mut answered = vec![false; self.sources.len()];

    for (idx, result) in fetched {
      answered[idx] = true;
      let source = Arc::clone(&self.sources[idx]);
      let name = source.name().to_string();
      let records = match result {
        Ok(records) => records,
        Err(e) => {
          tracing::warn!(source = %name, error = %e, "source fetch failed; skipping for this cycle");
          report.failed_sources.push(name);
          continue;
        }
      };
      report.new_events += self.merge(state, source.as_ref(), records, max_per_source, config);
    }

    // Tasks that never reported back (aborted) count as failed.
    for (idx, done) in answered.into_iter().enumerate() {
      if !done {
        report.failed_sources.push(self.sources[idx].name().to_string());
      }
    }

    report.evicted_events = state
      .events
      .evict(Duration::days(config.event_retention_days), config.max_events);
    if report.evicted_events > 0 {
      tracing::debug!(evicted = report.evicted_events, "evicted old events");
    }

    tracing::info!(
      new_events = report.new_events,
      failed = report.failed_sources.len(),
      total_events = state.events.len(),
      "collection finished"
    );
    report
  }

  /// Normalize and insert one source's records; advance its watermark. Single writer.
  fn merge(
    &mut self,
    state: &mut AnalysisState,
    source: &dyn EventSource,
    records: Vec<RawRecord>,
    cap: usize,
    config: &Config,
  ) -> usize {
    let name = source.name().to_string();
    let mut newest = self.watermarks.get(&name).copied();
    let mut added = 0;

    for raw in records.into_iter().take(cap) {
      if raw.source_type() != source.source_type() {
        tracing::warn!(source = %name, record = raw.id(), "record from wrong source type; skipping");
        continue;
      }
      let event = match normalize::normalize(&raw, config.location_precision) {
        Ok(event) => event,
        Err(e) => {
          tracing::warn!(source = %name, record = raw.id(), error = %e, "skipping malformed record");
          continue;
        }
      };

      if newest.map_or(true, |w| event.timestamp > w) {
        newest = Some(event.timestamp);
      }
      if !state.events.insert(event.clone()) {
        continue;
      }
      added += 1;
      state
        .source_stats
        .entry(name.clone())
        .or_insert_with(|| SourceStats::new(event.timestamp))
        .record(&event);
      if event.source_type == SourceType::Location {
        state.record_visit(&event);
      }
    }

    if let Some(ts) = newest {
      self.watermarks.insert(name, ts);
    }
    added
  }
}

impl Default for Collector {
  fn default() -> Self {
    Self::new()
  }
}

/// Source backed by an in-memory buffer. Used by the CLI and in tests.
pub struct MemorySource {
  source_type: SourceType,
  name: String,
  records: Mutex<Vec<RawRecord>>,
}

impl MemorySource {
  pub fn new(source_type: SourceType) -> Self {
    Self::named(source_type, source_type.as_str())
  }

  pub fn named(source_type: SourceType, name: impl Into<String>) -> Self {
    Self {
      source_type,
      name: name.into(),
      records: Mutex::new(Vec::new()),
    }
  }

  pub fn push(&self, record: RawRecord) {
    self.records.lock().push(record);
  }

  pub fn extend(&self, records: impl IntoIterator<Item = RawRecord>) {
    self.records.lock().extend(records);
  }

  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().is_empty()
  }
}

fn record_time(raw: &RawRecord) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw.timestamp().trim())
    .ok()
    .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl EventSource for MemorySource {
  fn source_type(&self) -> SourceType {
    self.source_type
  }

  fn name(&self) -> &str {
    &self.name
  }

  async fn fetch(&self, watermark: Option<DateTime<Utc>>, cap: usize) -> Result<Vec<RawRecord>, EngineError> {
    let records = self.records.lock();
    // Unparseable timestamps are only offered on the first fetch.
    let mut newer: Vec<(Option<DateTime<Utc>>, RawRecord)> = records
      .iter()
      .map(|r| (record_time(r), r.clone()))
      .filter(|(ts, _)| match (ts, watermark) {
        (Some(ts), Some(w)) => *ts > w,
        (_, None) => true,
        (None, Some(_)) => false,
      })
      .collect();
    newer.sort_by_key(|(ts, _)| *ts);
    Ok(newer.into_iter().take(cap).map(|(_, r)| r).collect())
  }
}
