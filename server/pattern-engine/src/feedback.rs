//! Active suggestion set, per-type thresholds and the feedback loop.
//!
//! Positive feedback lowers the type's threshold by one step (floor), negative
//! raises it (ceiling). Everything here sits behind a single lock so feedback
//! can arrive while a cycle is running.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::Config;
use crate::error::EngineError;
use crate::suggest;
use crate::types::{Suggestion, SuggestionStatus, SuggestionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
  Accepted,
  Rejected,
  /// Zero (or non-numeric) feedback: recorded nowhere, nothing changes.
  Neutral,
  NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounts {
  pub accepted: u64,
  pub rejected: u64,
}

/// Per-type reporting row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStats {
  pub suggestion_type: SuggestionType,
  pub accepted: u64,
  pub rejected: u64,
  pub threshold: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedbackPolicy {
  pub step: f64,
  pub floor: f64,
  pub ceiling: f64,
}

impl FeedbackPolicy {
  pub fn from_config(config: &Config) -> Self {
    Self {
      step: config.feedback_step,
      floor: config.threshold_floor,
      ceiling: config.threshold_ceiling,
    }
  }
}

#[derive(Debug)]
pub struct SuggestionBoard {
  active: Vec<Suggestion>,
  thresholds: BTreeMap<SuggestionType, f64>,
  counts: BTreeMap<SuggestionType, FeedbackCounts>,
  /// Provenance keys of suggestions closed by feedback; never regenerated.
  suppressed: BTreeSet<String>,
  policy: FeedbackPolicy,
}

impl SuggestionBoard {
  pub fn new(thresholds: BTreeMap<SuggestionType, f64>, policy: FeedbackPolicy) -> Self {
    Self {
      active: Vec::new(),
      thresholds,
      counts: BTreeMap::new(),
      suppressed: BTreeSet::new(),
      policy,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self, EngineError> {
    Ok(Self::new(config.suggestion_thresholds()?, FeedbackPolicy::from_config(config)))
  }

  pub fn thresholds(&self) -> &BTreeMap<SuggestionType, f64> {
    &self.thresholds
  }

  pub fn threshold(&self, kind: SuggestionType) -> f64 {
    self.thresholds.get(&kind).copied().unwrap_or(self.policy.ceiling)
  }

  pub fn counts(&self) -> &BTreeMap<SuggestionType, FeedbackCounts> {
    &self.counts
  }

  pub fn suppressed(&self) -> &BTreeSet<String> {
    &self.suppressed
  }

  /// Restore persisted learning state (thresholds override, counters and suppressions replace).
  pub fn restore(
    &mut self,
    thresholds: BTreeMap<SuggestionType, f64>,
    counts: BTreeMap<SuggestionType, FeedbackCounts>,
    suppressed: BTreeSet<String>,
  ) {
    self.thresholds.extend(thresholds);
    self.counts = counts;
    self.suppressed = suppressed;
  }

  /// True if a suggestion with this provenance is active or was closed by feedback.
  pub fn is_known(&self, provenance_key: &str) -> bool {
    self.suppressed.contains(provenance_key)
      || self.active.iter().any(|s| s.status == SuggestionStatus::Active && s.provenance_key() == provenance_key)
  }

  /// Apply a user signal in -1..1 to an active suggestion.
  pub fn record_feedback(&mut self, suggestion_id: &str, value: f64, now: DateTime<Utc>) -> FeedbackOutcome {
    let Some(pos) = self
      .active
      .iter()
      .position(|s| s.id == suggestion_id && s.status == SuggestionStatus::Active)
    else {
      let err = EngineError::FeedbackTargetNotFound(suggestion_id.to_string());
      tracing::debug!(error = %err, "ignoring feedback");
      return FeedbackOutcome::NotFound;
    };

    if self.active[pos].is_expired(now) {
      self.active[pos].status = SuggestionStatus::Expired;
      let err = EngineError::FeedbackTargetNotFound(suggestion_id.to_string());
      tracing::debug!(error = %err, "ignoring feedback on expired suggestion");
      return FeedbackOutcome::NotFound;
    }

    let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    if value == 0.0 {
      return FeedbackOutcome::Neutral;
    }

    let kind = self.active[pos].suggestion_type;
    let current = self.threshold(kind);
    let suggestion = &mut self.active[pos];
    let counts = self.counts.entry(kind).or_default();

    let outcome = if value > 0.0 {
      suggestion.status = SuggestionStatus::ActedUpon;
      counts.accepted += 1;
      self.thresholds.insert(kind, (current - self.policy.step).max(self.policy.floor));
      FeedbackOutcome::Accepted
    } else {
      suggestion.status = SuggestionStatus::Dismissed;
      counts.rejected += 1;
      self.thresholds.insert(kind, (current + self.policy.step).min(self.policy.ceiling));
      FeedbackOutcome::Rejected
    };
    self.suppressed.insert(suggestion.provenance_key());

    tracing::info!(
      suggestion_id,
      suggestion_type = %kind,
      value,
      threshold = self.threshold(kind),
      "feedback recorded"
    );
    outcome
  }

  /// Expire stale suggestions and drop every terminal one. Returns how many were dropped.
  pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
    for s in &mut self.active {
      if s.status == SuggestionStatus::Active && s.is_expired(now) {
        s.status = SuggestionStatus::Expired;
      }
    }
    let before = self.active.len();
    self.active.retain(|s| !s.status.is_terminal());
    let dropped = before - self.active.len();
    if dropped > 0 {
      tracing::debug!(dropped, "pruned inactive suggestions");
    }
    dropped
  }

  /// Prune, then add new suggestions that are not already known. Returns how many were added.
  pub fn publish(&mut self, fresh: Vec<Suggestion>, now: DateTime<Utc>) -> usize {
    self.prune(now);
    let mut added = 0;
    for s in fresh {
      if s.is_expired(now) || self.is_known(&s.provenance_key()) {
        continue;
      }
      self.active.push(s);
      added += 1;
    }
    added
  }

  /// Active, unexpired suggestions, ranked and capped.
  pub fn ranked(&self, max: usize, now: DateTime<Utc>) -> Vec<Suggestion> {
    let mut out: Vec<Suggestion> = self
      .active
      .iter()
      .filter(|s| s.status == SuggestionStatus::Active && !s.is_expired(now))
      .cloned()
      .collect();
    suggest::rank(&mut out);
    out.truncate(max);
    out
  }

  pub fn get(&self, suggestion_id: &str) -> Option<&Suggestion> {
    self.active.iter().find(|s| s.id == suggestion_id)
  }

  pub fn report(&self) -> Vec<FeedbackStats> {
    SuggestionType::ALL
      .iter()
      .map(|&t| {
        let c = self.counts.get(&t).copied().unwrap_or_default();
        FeedbackStats {
          suggestion_type: t,
          accepted: c.accepted,
          rejected: c.rejected,
          threshold: self.threshold(t),
        }
      })
      .collect()
  }
}

pub type SharedBoard = Arc<Mutex<SuggestionBoard>>;

/// Cloneable handle for recording feedback from outside the engine, e.g.
/// from another task while a cycle is in flight.
#[derive(Clone)]
pub struct FeedbackHandle {
  board: SharedBoard,
}

impl FeedbackHandle {
  pub fn new(board: SharedBoard) -> Self {
    Self { board }
  }

  pub fn record_feedback(&self, suggestion_id: &str, value: f64) -> FeedbackOutcome {
    self.record_feedback_at(suggestion_id, value, Utc::now())
  }

  pub fn record_feedback_at(&self, suggestion_id: &str, value: f64, now: DateTime<Utc>) -> FeedbackOutcome {
    self.board.lock().record_feedback(suggestion_id, value, now)
  }
}
