//! Persistable engine state: learned patterns, correlations, feedback and
//! per-source progress. Events are not persisted; sources replay from the
//! watermarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::MAX_PATTERN_CONFIDENCE;
use crate::error::EngineError;
use crate::feedback::FeedbackCounts;
use crate::stats::SourceStats;
use crate::types::{Correlation, LocationContext, Pattern, SuggestionType};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
  pub version: u32,
  #[serde(default)]
  pub watermarks: BTreeMap<String, DateTime<Utc>>,
  #[serde(default)]
  pub source_stats: BTreeMap<String, SourceStats>,
  #[serde(default)]
  pub locations: BTreeMap<String, LocationContext>,
  #[serde(default)]
  pub patterns: Vec<Pattern>,
  #[serde(default)]
  pub correlations: Vec<Correlation>,
  #[serde(default)]
  pub thresholds: BTreeMap<SuggestionType, f64>,
  #[serde(default)]
  pub feedback: BTreeMap<SuggestionType, FeedbackCounts>,
  #[serde(default)]
  pub suppressed: BTreeSet<String>,
}

impl EngineSnapshot {
  pub fn to_json(&self) -> Result<String, EngineError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn from_json(s: &str) -> Result<Self, EngineError> {
    let snapshot: Self = serde_json::from_str(s)?;
    snapshot.validate()?;
    Ok(snapshot)
  }

  /// Reject snapshots whose values the engine could never have produced.
  ///
  /// A bad snapshot is a startup input, so it fails as `Configuration`.
  pub fn validate(&self) -> Result<(), EngineError> {
    if self.version != SNAPSHOT_VERSION {
      return Err(EngineError::configuration(
        "snapshot.version",
        &format!("unsupported snapshot version {}", self.version),
      ));
    }
    if let Some(p) = self
      .patterns
      .iter()
      .find(|p| !(0.0..=MAX_PATTERN_CONFIDENCE).contains(&p.confidence))
    {
      return Err(EngineError::configuration(
        "snapshot.patterns",
        &format!("pattern {} confidence out of range", p.id),
      ));
    }
    if let Some(c) = self.correlations.iter().find(|c| !(0.0..=1.0).contains(&c.confidence)) {
      return Err(EngineError::configuration(
        "snapshot.correlations",
        &format!("correlation {} confidence out of range", c.id),
      ));
    }
    if self.thresholds.values().any(|t| !(0.0..=1.0).contains(t)) {
      return Err(EngineError::configuration("snapshot.thresholds", "threshold out of range"));
    }
    Ok(())
  }
}
