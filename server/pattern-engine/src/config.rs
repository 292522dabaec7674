//! Engine configuration with sane defaults.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::EngineError;
use crate::types::SuggestionType;

/// Hard ceiling on pattern confidence; additive reinforcement never goes past it.
pub const MAX_PATTERN_CONFIDENCE: f64 = 0.95;
/// Largest correlation window accepted by `validate`.
pub const MAX_TIME_WINDOW_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Tunable thresholds for collection, mining and suggestion generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Max raw records fetched per source per cycle.
  pub max_events_per_source: usize,
  /// Per-source fetch timeout; a timed-out source is skipped for the cycle.
  pub fetch_timeout_ms: u64,
  /// Sliding window length (events) for sequential mining.
  pub sequence_window: usize,
  /// Min occurrences for any pattern to be recorded.
  pub min_occurrences: u64,
  /// Timeline positions inspected on each side of a location visit.
  pub spatial_neighborhood: usize,
  pub pattern_initial_confidence: f64,
  /// Additive confidence bump each time a pattern is reobserved.
  pub pattern_confidence_step: f64,
  pub pattern_confidence_cap: f64,
  /// Extra initial confidence per temporal occurrence beyond `min_occurrences`.
  pub temporal_occurrence_bonus: f64,
  /// Max gap between consecutive events of one correlation window.
  pub time_window_minutes: i64,
  /// Floor of correlation confidence (0..1).
  pub correlation_min_confidence: f64,
  pub pattern_insight_threshold: f64,
  pub correlation_insight_threshold: f64,
  /// Suggestion type name -> min confidence. Missing types fall back to defaults.
  pub thresholds: BTreeMap<String, f64>,
  pub threshold_floor: f64,
  pub threshold_ceiling: f64,
  /// Threshold adjustment per feedback signal.
  pub feedback_step: f64,
  /// Decimal places kept when rounding coordinates into a location id.
  pub location_precision: u32,
  /// Offset applied before hour/day bucketing.
  pub utc_offset_minutes: i32,
  /// Events older than this (relative to the newest event) are evicted.
  pub event_retention_days: i64,
  pub max_events: usize,
  pub max_correlations: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_events_per_source: 100,
      fetch_timeout_ms: 5_000,
      sequence_window: 20,
      min_occurrences: 2,
      spatial_neighborhood: 5,
      pattern_initial_confidence: 0.6,
      pattern_confidence_step: 0.05,
      pattern_confidence_cap: MAX_PATTERN_CONFIDENCE,
      temporal_occurrence_bonus: 0.02,
      time_window_minutes: 15,
      correlation_min_confidence: 0.6,
      pattern_insight_threshold: 0.65,
      correlation_insight_threshold: 0.7,
      thresholds: default_thresholds()
        .into_iter()
        .map(|(t, v)| (t.as_str().to_string(), v))
        .collect(),
      threshold_floor: 0.5,
      threshold_ceiling: 0.9,
      feedback_step: 0.05,
      location_precision: 3,
      utc_offset_minutes: 0,
      event_retention_days: 30,
      max_events: 10_000,
      max_correlations: 1_000,
    }
  }
}

/// Default min confidence per suggestion type.
pub fn default_thresholds() -> BTreeMap<SuggestionType, f64> {
  SuggestionType::ALL
    .iter()
    .map(|&t| {
      let v = match t {
        SuggestionType::Routine => 0.6,
        SuggestionType::Workflow => 0.65,
        SuggestionType::Content => 0.6,
        SuggestionType::SearchStrategy => 0.6,
        SuggestionType::CrossSource => 0.65,
      };
      (t, v)
    })
    .collect()
}

impl Config {
  pub fn from_json_str(s: &str) -> Result<Self, EngineError> {
    let config: Config = serde_json::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json_str(&raw)
  }

  /// Reject settings the engine cannot run with. Called at startup.
  pub fn validate(&self) -> Result<(), EngineError> {
    self.suggestion_thresholds()?;

    if self.threshold_floor > self.threshold_ceiling {
      return Err(EngineError::configuration(
        "threshold_floor",
        "must not exceed threshold_ceiling",
      ));
    }
    for (field, v) in [
      ("threshold_floor", self.threshold_floor),
      ("threshold_ceiling", self.threshold_ceiling),
      ("correlation_min_confidence", self.correlation_min_confidence),
      ("pattern_initial_confidence", self.pattern_initial_confidence),
      ("pattern_insight_threshold", self.pattern_insight_threshold),
      ("correlation_insight_threshold", self.correlation_insight_threshold),
    ] {
      if !(0.0..=1.0).contains(&v) {
        return Err(EngineError::configuration(field, "must be within 0..1"));
      }
    }
    if !(0.0..=MAX_PATTERN_CONFIDENCE).contains(&self.pattern_confidence_cap) {
      return Err(EngineError::configuration(
        "pattern_confidence_cap",
        "must be within 0..0.95",
      ));
    }
    if self.pattern_initial_confidence > self.pattern_confidence_cap {
      return Err(EngineError::configuration(
        "pattern_initial_confidence",
        "must not exceed pattern_confidence_cap",
      ));
    }
    if self.pattern_confidence_step < 0.0 || self.temporal_occurrence_bonus < 0.0 || self.feedback_step < 0.0 {
      return Err(EngineError::configuration("step", "confidence steps must be non-negative"));
    }
    if self.sequence_window == 0 {
      return Err(EngineError::configuration("sequence_window", "must be at least 1"));
    }
    if self.min_occurrences == 0 {
      return Err(EngineError::configuration("min_occurrences", "must be at least 1"));
    }
    if self.time_window_minutes <= 0 || self.time_window_minutes > MAX_TIME_WINDOW_MINUTES {
      return Err(EngineError::configuration(
        "time_window_minutes",
        "must be positive and at most one week",
      ));
    }
    if self.utc_offset_minutes.abs() >= 24 * 60 {
      return Err(EngineError::configuration("utc_offset_minutes", "must be within one day"));
    }
    if self.event_retention_days <= 0 || self.max_events == 0 {
      return Err(EngineError::configuration("retention", "event retention must be positive"));
    }
    if self.event_retention_days > MAX_RETENTION_DAYS {
      return Err(EngineError::configuration(
        "event_retention_days",
        "must be at most 100 years",
      ));
    }
    Ok(())
  }

  /// Typed thresholds: configured values over defaults. Unknown type names are an error.
  pub fn suggestion_thresholds(&self) -> Result<BTreeMap<SuggestionType, f64>, EngineError> {
    let mut out = default_thresholds();
    for (name, &value) in &self.thresholds {
      let kind = SuggestionType::from_name(name).ok_or_else(|| {
        EngineError::configuration("thresholds", &format!("unknown suggestion type '{}'", name))
      })?;
      if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::configuration(
          "thresholds",
          &format!("threshold for '{}' must be within 0..1", name),
        ));
      }
      out.insert(kind, value);
    }
    Ok(out)
  }

  pub fn offset(&self) -> FixedOffset {
    FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
  }
}
