//! Cross-source correlation: group nearby events into time windows and score
//! every pair of source types that co-occur in a window.
//!
//! Scoring: `min_confidence + (1 - min_confidence) * time_proximity`, where
//! proximity falls linearly from 1 (instant) to 0 (window as long as the gap limit).

use chrono::Duration;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::Config;
use crate::fingerprint;
use crate::types::{Correlation, Event, SourceType};

pub const RELATIONSHIP_CO_OCCURRENCE: &str = "temporal_co_occurrence";

/// Entities kept per correlation.
const MAX_ENTITIES: usize = 20;

/// Split the timeline into windows: consecutive events at most `time_window_minutes` apart.
pub fn group_windows<'a>(events: &[&'a Event], config: &Config) -> Vec<Vec<&'a Event>> {
  let max_gap = Duration::minutes(config.time_window_minutes);
  let mut windows: Vec<Vec<&'a Event>> = Vec::new();
  let mut current: Vec<&'a Event> = Vec::new();

  for &event in events {
    if let Some(prev) = current.last() {
      if event.timestamp - prev.timestamp > max_gap {
        windows.push(std::mem::take(&mut current));
      }
    }
    current.push(event);
  }
  if !current.is_empty() {
    windows.push(current);
  }
  windows
}

/// Time proximity of a window in 0..1.
pub fn time_proximity(span_seconds: i64, config: &Config) -> f64 {
  let limit = (config.time_window_minutes * 60) as f64;
  (1.0 - span_seconds as f64 / limit).clamp(0.0, 1.0)
}

/// Detect correlations over the whole timeline.
///
/// Returns one record per (window, source-type pair), in timeline order then pair order.
pub fn detect(events: &[&Event], config: &Config) -> Vec<Correlation> {
  let min = config.correlation_min_confidence;
  let mut out = Vec::new();

  for window in group_windows(events, config) {
    let types: BTreeSet<SourceType> = window.iter().map(|e| e.source_type).collect();
    if types.len() < 2 {
      continue;
    }
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
      continue;
    };
    let span_seconds = (last.timestamp - first.timestamp).num_seconds();
    let confidence = (min + (1.0 - min) * time_proximity(span_seconds, config)).clamp(min, 1.0);

    let types: Vec<SourceType> = types.into_iter().collect();
    for (i, &a) in types.iter().enumerate() {
      for &b in &types[i + 1..] {
        let members: Vec<&Event> = window
          .iter()
          .copied()
          .filter(|e| e.source_type == a || e.source_type == b)
          .collect();
        let event_ids: Vec<String> = members.iter().map(|e| e.id.clone()).collect();

        let mut entities: Vec<String> = Vec::new();
        for entity in members.iter().flat_map(|e| e.entities.iter()) {
          if entities.len() >= MAX_ENTITIES {
            break;
          }
          if !entities.contains(entity) {
            entities.push(entity.clone());
          }
        }

        let anchor = members.first().map(|e| e.id.as_str()).unwrap_or_default();
        out.push(Correlation {
          id: fingerprint::correlation_id((a, b), anchor),
          source_event_ids: event_ids,
          source_types: vec![a, b],
          confidence,
          relationship_type: RELATIONSHIP_CO_OCCURRENCE.to_string(),
          entities_involved: entities,
          timestamp: first.timestamp,
          window_span_seconds: span_seconds,
          description: describe(a, b, span_seconds, members.len()),
        });
      }
    }
  }
  out
}

fn describe(a: SourceType, b: SourceType, span_seconds: i64, events: usize) -> String {
  format!(
    "{} and {} activity within {} minutes ({} events)",
    a,
    b,
    (span_seconds + 59) / 60,
    events
  )
}

/// Correlations kept across cycles.
///
/// A detected window that shares an event with a stored record of the same
/// pair is that record: new events extend it in place, a trimmed or repeated
/// window changes nothing. Distinct windows stay separate records. At most
/// `max_correlations` are kept, oldest evicted.
#[derive(Debug, Default)]
pub struct CorrelationStore {
  correlations: Vec<Correlation>,
  ids: HashSet<String>,
  /// (pair, event id) -> id of the correlation that event belongs to.
  members: HashMap<(SourceType, SourceType, String), String>,
}

/// Ids touched by one merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
  pub created: Vec<String>,
  pub extended: Vec<String>,
}

fn pair_of(c: &Correlation) -> Option<(SourceType, SourceType)> {
  let types: BTreeSet<SourceType> = c.source_types.iter().copied().collect();
  let mut it = types.into_iter();
  match (it.next(), it.next()) {
    (Some(a), Some(b)) => Some((a, b)),
    _ => None,
  }
}

impl CorrelationStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_correlations(correlations: Vec<Correlation>, max: usize) -> Self {
    let mut store = Self::new();
    store.merge(correlations, max);
    store
  }

  /// Fold freshly detected correlations into the store.
  pub fn merge(&mut self, detected: Vec<Correlation>, max: usize) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for c in detected {
      let Some(pair) = pair_of(&c) else {
        continue;
      };

      let known = c
        .source_event_ids
        .iter()
        .find_map(|e| self.members.get(&(pair.0, pair.1, e.clone())))
        .cloned()
        .or_else(|| self.ids.contains(&c.id).then(|| c.id.clone()));

      match known {
        Some(id) => {
          if self.extend(&id, pair, c) && !outcome.extended.contains(&id) && !outcome.created.contains(&id) {
            outcome.extended.push(id);
          }
        }
        None => {
          for e in &c.source_event_ids {
            self.members.insert((pair.0, pair.1, e.clone()), c.id.clone());
          }
          self.ids.insert(c.id.clone());
          outcome.created.push(c.id.clone());
          self.correlations.push(c);
        }
      }
    }

    if self.correlations.len() > max {
      self.correlations.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
      let excess = self.correlations.len() - max;
      for evicted in self.correlations.drain(..excess) {
        self.ids.remove(&evicted.id);
      }
      let ids = &self.ids;
      self.members.retain(|_, id| ids.contains(id));
      outcome.created.retain(|id| ids.contains(id));
      outcome.extended.retain(|id| ids.contains(id));
    }
    outcome
  }

  /// Add the window's unseen events to a stored record. Returns false if there were none.
  fn extend(&mut self, id: &str, pair: (SourceType, SourceType), window: Correlation) -> bool {
    let Some(stored) = self.correlations.iter_mut().find(|c| c.id == id) else {
      return false;
    };
    let fresh: Vec<String> = window
      .source_event_ids
      .into_iter()
      .filter(|e| !stored.source_event_ids.contains(e))
      .collect();
    if fresh.is_empty() {
      return false;
    }

    let start = stored.timestamp.min(window.timestamp);
    let end = (stored.timestamp + Duration::seconds(stored.window_span_seconds))
      .max(window.timestamp + Duration::seconds(window.window_span_seconds));
    for e in &fresh {
      self.members.insert((pair.0, pair.1, e.clone()), id.to_string());
    }
    stored.source_event_ids.extend(fresh);
    stored.timestamp = start;
    stored.window_span_seconds = (end - start).num_seconds();
    stored.confidence = stored.confidence.min(window.confidence);
    for entity in window.entities_involved {
      if stored.entities_involved.len() >= MAX_ENTITIES {
        break;
      }
      if !stored.entities_involved.contains(&entity) {
        stored.entities_involved.push(entity);
      }
    }
    stored.description = describe(pair.0, pair.1, stored.window_span_seconds, stored.source_event_ids.len());
    true
  }

  pub fn get(&self, id: &str) -> Option<&Correlation> {
    self.correlations.iter().find(|c| c.id == id)
  }

  pub fn correlations(&self) -> &[Correlation] {
    &self.correlations
  }

  pub fn len(&self) -> usize {
    self.correlations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.correlations.is_empty()
  }
}
