//! Pattern mining: sequential, temporal and spatial detectors over the timeline.
//!
//! Detectors are independent and only produce `Observation`s; `PatternStore`
//! turns them into upserts. Confidence starts at a fixed value and grows by a
//! fixed step per reobservation, capped; it never decreases.

use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::Config;
use crate::fingerprint;
use crate::stats::{hour_bucket, weekday_bucket};
use crate::types::*;

/// Tags of a sequence shown in descriptions.
const SIGNATURE_PREVIEW: usize = 4;

// ---------------------------------------------------------------------------
// Index key
// ---------------------------------------------------------------------------

/// What makes two observations "the same pattern".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternKey {
  Sequential(Vec<String>),
  Temporal(TemporalConstraint, SourceType),
  Spatial(String, SourceType),
}

impl PatternKey {
  /// Recover the key of a stored pattern (used when restoring a snapshot).
  pub fn of(pattern: &Pattern) -> Option<Self> {
    match &pattern.kind {
      PatternKind::Sequential { event_signature } => Some(Self::Sequential(event_signature.clone())),
      PatternKind::Temporal { temporal_constraint } => pattern
        .source_types
        .first()
        .map(|&st| Self::Temporal(*temporal_constraint, st)),
      PatternKind::Spatial { location_key } => pattern
        .source_types
        .iter()
        .find(|&&st| st != SourceType::Location)
        .map(|&st| Self::Spatial(location_key.clone(), st)),
    }
  }

  pub fn canonical(&self) -> String {
    match self {
      Self::Sequential(sig) => format!("seq|{}", sig.join(">")),
      Self::Temporal(TemporalConstraint::Hour(h), st) => format!("hour|{}|{}", h, st),
      Self::Temporal(TemporalConstraint::DayOfWeek(d), st) => format!("dow|{}|{}", d, st),
      Self::Spatial(loc, st) => format!("loc|{}|{}", loc, st),
    }
  }

  fn kind(&self) -> PatternKind {
    match self {
      Self::Sequential(sig) => PatternKind::Sequential {
        event_signature: sig.clone(),
      },
      Self::Temporal(t, _) => PatternKind::Temporal {
        temporal_constraint: *t,
      },
      Self::Spatial(loc, _) => PatternKind::Spatial {
        location_key: loc.clone(),
      },
    }
  }
}

/// One detector finding, before it is merged into the store.
#[derive(Debug, Clone)]
pub struct Observation {
  pub key: PatternKey,
  pub occurrences: u64,
  pub initial_confidence: f64,
  pub source_types: Vec<SourceType>,
  pub name: String,
  pub description: String,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Patterns with an O(1) index from key to position.
#[derive(Debug, Default)]
pub struct PatternStore {
  patterns: Vec<Pattern>,
  index: HashMap<PatternKey, usize>,
}

impl PatternStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild from persisted patterns. Later duplicates of a key are dropped.
  pub fn from_patterns(patterns: Vec<Pattern>) -> Self {
    let mut store = Self::new();
    for pattern in patterns {
      let Some(key) = PatternKey::of(&pattern) else {
        tracing::warn!(pattern_id = %pattern.id, "dropping pattern without a usable key");
        continue;
      };
      if store.index.contains_key(&key) {
        continue;
      }
      store.index.insert(key, store.patterns.len());
      store.patterns.push(pattern);
    }
    store
  }

  /// Merge one observation. Returns the id of the created or updated pattern.
  pub fn upsert(&mut self, obs: Observation, now: DateTime<Utc>, config: &Config) -> String {
    let cap = config.pattern_confidence_cap;
    if let Some(&pos) = self.index.get(&obs.key) {
      let pattern = &mut self.patterns[pos];
      pattern.observation_count += 1;
      pattern.confidence = (pattern.confidence + config.pattern_confidence_step).min(cap);
      if now > pattern.last_observed {
        pattern.last_observed = now;
      }
      pattern.description = obs.description;
      return pattern.id.clone();
    }

    let id = fingerprint::pattern_id(&obs.key.canonical());
    let pattern = Pattern {
      id: id.clone(),
      name: obs.name,
      description: obs.description,
      confidence: obs.initial_confidence.clamp(0.0, cap),
      source_types: obs.source_types,
      kind: obs.key.kind(),
      observation_count: obs.occurrences,
      last_observed: now,
    };
    self.index.insert(obs.key, self.patterns.len());
    self.patterns.push(pattern);
    id
  }

  pub fn find(&self, key: &PatternKey) -> Option<&Pattern> {
    self.index.get(key).map(|&pos| &self.patterns[pos])
  }

  pub fn get(&self, id: &str) -> Option<&Pattern> {
    self.patterns.iter().find(|p| p.id == id)
  }

  pub fn patterns(&self) -> &[Pattern] {
    &self.patterns
  }

  pub fn len(&self) -> usize {
    self.patterns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.patterns.is_empty()
  }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// One pattern touched by a mining pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
  pub id: String,
  /// Confidence before this pass; `None` if the pattern was created.
  pub previous_confidence: Option<f64>,
}

impl Upserted {
  /// True if the pattern was created, or stood below `threshold` before this pass.
  pub fn first_reached(&self, threshold: f64) -> bool {
    self.previous_confidence.map_or(true, |prev| prev < threshold)
  }
}

/// Run all three detectors and merge their findings.
pub fn mine_all(
  store: &mut PatternStore,
  events: &[&Event],
  locations: &BTreeMap<String, LocationContext>,
  config: &Config,
  now: DateTime<Utc>,
) -> Vec<Upserted> {
  let offset = config.offset();
  let mut observations = mine_sequential(events, config);
  observations.extend(mine_temporal(events, config, &offset));
  observations.extend(mine_spatial(events, locations, config));

  let mut upserted: Vec<Upserted> = Vec::with_capacity(observations.len());
  for obs in observations {
    let previous_confidence = store.find(&obs.key).map(|p| p.confidence);
    let id = store.upsert(obs, now, config);
    if !upserted.iter().any(|u| u.id == id) {
      upserted.push(Upserted { id, previous_confidence });
    }
  }
  upserted
}

/// Slide a fixed window over the timeline and count identical tag sequences.
pub fn mine_sequential(events: &[&Event], config: &Config) -> Vec<Observation> {
  let window = config.sequence_window;
  if window == 0 || events.len() < window {
    return Vec::new();
  }

  let tags: Vec<String> = events.iter().map(|e| e.tag()).collect();
  let mut counts: HashMap<&[String], u64> = HashMap::new();
  let mut first_seen: Vec<&[String]> = Vec::new();
  for start in 0..=(tags.len() - window) {
    let sig = &tags[start..start + window];
    let count = counts.entry(sig).or_insert(0);
    if *count == 0 {
      first_seen.push(sig);
    }
    *count += 1;
  }

  let mut out = Vec::new();
  for sig in first_seen {
    let count = counts[sig];
    if count < config.min_occurrences {
      continue;
    }
    let source_types = signature_source_types(sig);
    if source_types.len() < 2 {
      continue;
    }

    let type_names: Vec<&str> = source_types.iter().map(|t| t.as_str()).collect();
    let mut preview = sig.iter().take(SIGNATURE_PREVIEW).cloned().collect::<Vec<_>>().join(" -> ");
    if sig.len() > SIGNATURE_PREVIEW {
      preview.push_str(" -> ...");
    }
    out.push(Observation {
      key: PatternKey::Sequential(sig.to_vec()),
      occurrences: count,
      initial_confidence: config.pattern_initial_confidence,
      name: format!("Recurring {}-step sequence across {}", sig.len(), type_names.join(" + ")),
      description: format!("Sequence {} seen {} times in the current timeline", preview, count),
      source_types,
    });
  }
  out
}

fn signature_source_types(sig: &[String]) -> Vec<SourceType> {
  let set: BTreeSet<SourceType> = sig
    .iter()
    .filter_map(|tag| tag.split_once(':'))
    .filter_map(|(st, _)| SourceType::from_str_loose(st))
    .collect();
  set.into_iter().collect()
}

/// Bucket events by hour of day and, separately, by day of week, per source type.
pub fn mine_temporal(events: &[&Event], config: &Config, offset: &FixedOffset) -> Vec<Observation> {
  let mut buckets: BTreeMap<(TemporalConstraint, SourceType), u64> = BTreeMap::new();
  for event in events {
    let hour = TemporalConstraint::Hour(hour_bucket(&event.timestamp, offset));
    let day = TemporalConstraint::DayOfWeek(weekday_bucket(&event.timestamp, offset));
    *buckets.entry((hour, event.source_type)).or_insert(0) += 1;
    *buckets.entry((day, event.source_type)).or_insert(0) += 1;
  }

  buckets
    .into_iter()
    .filter(|(_, count)| *count >= config.min_occurrences)
    .map(|((constraint, st), count)| {
      let extra = (count - config.min_occurrences) as f64;
      Observation {
        key: PatternKey::Temporal(constraint, st),
        occurrences: count,
        initial_confidence: (config.pattern_initial_confidence + extra * config.temporal_occurrence_bonus)
          .min(config.pattern_confidence_cap),
        source_types: vec![st],
        name: format!("{} activity {}", st, constraint.describe()),
        description: format!("{} {} events {}", count, st, constraint.describe()),
      }
    })
    .collect()
}

/// Tally source types seen around each visit to a frequently visited place.
pub fn mine_spatial(
  events: &[&Event],
  locations: &BTreeMap<String, LocationContext>,
  config: &Config,
) -> Vec<Observation> {
  let mut visits: HashMap<&str, Vec<usize>> = HashMap::new();
  for (pos, event) in events.iter().enumerate() {
    if event.source_type != SourceType::Location {
      continue;
    }
    if let Some(loc) = event.location_id() {
      visits.entry(loc).or_default().push(pos);
    }
  }

  let radius = config.spatial_neighborhood;
  let mut out = Vec::new();
  for (location_id, ctx) in locations {
    if ctx.visit_count < config.min_occurrences {
      continue;
    }
    let Some(positions) = visits.get(location_id.as_str()) else {
      continue;
    };

    // Each visit counts a co-occurring source type at most once.
    let mut tally: BTreeMap<SourceType, u64> = BTreeMap::new();
    for &pos in positions {
      let lo = pos.saturating_sub(radius);
      let hi = (pos + radius).min(events.len() - 1);
      let seen: BTreeSet<SourceType> = (lo..=hi)
        .filter(|&i| i != pos)
        .map(|i| events[i].source_type)
        .filter(|&st| st != SourceType::Location)
        .collect();
      for st in seen {
        *tally.entry(st).or_insert(0) += 1;
      }
    }

    let place = ctx.label.clone().unwrap_or_else(|| location_id.clone());
    for (st, count) in tally {
      if count < config.min_occurrences {
        continue;
      }
      out.push(Observation {
        key: PatternKey::Spatial(location_id.clone(), st),
        occurrences: count,
        initial_confidence: config.pattern_initial_confidence,
        source_types: vec![st.min(SourceType::Location), st.max(SourceType::Location)],
        name: format!("{} at {}", st, place),
        description: format!("{} activity around {} of {} visits to {}", st, count, ctx.visit_count, place),
      });
    }
  }
  out
}

/// Whether a temporal pattern applies at `now`.
pub fn matches_now(constraint: TemporalConstraint, now: DateTime<Utc>, offset: &FixedOffset) -> bool {
  match constraint {
    TemporalConstraint::Hour(h) => hour_bucket(&now, offset) == h,
    TemporalConstraint::DayOfWeek(d) => weekday_bucket(&now, offset) == d,
  }
}
