//! Suggestion generation: map confident patterns and correlations to
//! expiring, ranked suggestions.
//!
//! Rules are keyed on the source-type combination; a record yields at most
//! one suggestion and only when its confidence clears the type's threshold.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::BTreeMap;

use crate::fingerprint;
use crate::patterns::matches_now;
use crate::types::*;

/// Confidence at which a suggestion's base priority is promoted one level.
const PROMOTE_AT: f64 = 0.9;

/// Entities named in a suggestion body.
const MAX_NAMED_ENTITIES: usize = 3;

/// Suggestion kind for a set of co-occurring source types.
pub fn kind_for_source_types(types: &[SourceType]) -> SuggestionType {
  let has = |t: SourceType| types.contains(&t);
  if has(SourceType::Location) && has(SourceType::FileActivity) {
    SuggestionType::Content
  } else if has(SourceType::QueryLog) && has(SourceType::FileActivity) {
    SuggestionType::SearchStrategy
  } else {
    SuggestionType::CrossSource
  }
}

/// How long a suggestion of this kind stays relevant.
pub fn expiry_for(kind: SuggestionType) -> Duration {
  match kind {
    SuggestionType::Routine => Duration::hours(1),
    SuggestionType::SearchStrategy => Duration::days(1),
    SuggestionType::Content | SuggestionType::CrossSource => Duration::days(3),
    SuggestionType::Workflow => Duration::days(7),
  }
}

pub fn priority_for(kind: SuggestionType, confidence: f64) -> Priority {
  let base = match kind {
    SuggestionType::Routine => Priority::High,
    SuggestionType::Content | SuggestionType::Workflow => Priority::Medium,
    SuggestionType::SearchStrategy | SuggestionType::CrossSource => Priority::Low,
  };
  if confidence >= PROMOTE_AT {
    base.promoted()
  } else {
    base
  }
}

/// Sort by priority desc, confidence desc; ties by expiry then id for determinism.
pub fn rank(suggestions: &mut [Suggestion]) {
  suggestions.sort_by(|a, b| {
    b.priority
      .rank()
      .cmp(&a.priority.rank())
      .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
      .then_with(|| a.expires_at.cmp(&b.expires_at))
      .then_with(|| a.id.cmp(&b.id))
  });
}

/// Build suggestions from patterns and correlations, keeping only those at or
/// above their type's threshold.
pub fn generate(
  patterns: &[Pattern],
  correlations: &[Correlation],
  thresholds: &BTreeMap<SuggestionType, f64>,
  now: DateTime<Utc>,
  offset: &FixedOffset,
) -> Vec<Suggestion> {
  let candidates = patterns
    .iter()
    .filter_map(|p| from_pattern(p, now, offset))
    .chain(correlations.iter().map(|c| from_correlation(c, now)));

  let mut out: Vec<Suggestion> = Vec::new();
  for s in candidates {
    let Some(&threshold) = thresholds.get(&s.suggestion_type) else {
      continue;
    };
    if s.confidence < threshold {
      continue;
    }
    if out.iter().any(|o| o.provenance_key() == s.provenance_key()) {
      continue;
    }
    out.push(s);
  }
  rank(&mut out);
  out
}

/// Map one pattern to a suggestion. Temporal patterns only apply when they match `now`.
pub fn from_pattern(pattern: &Pattern, now: DateTime<Utc>, offset: &FixedOffset) -> Option<Suggestion> {
  let (kind, title, content) = match &pattern.kind {
    PatternKind::Sequential { .. } => {
      let types = join_types(&pattern.source_types);
      (
        SuggestionType::Workflow,
        format!("Recurring workflow across {}", types),
        format!(
          "{} Seen {} times. Consider setting up a shortcut for this routine.",
          pattern.description, pattern.observation_count
        ),
      )
    }
    PatternKind::Temporal { temporal_constraint } => {
      if !matches_now(*temporal_constraint, now, offset) {
        return None;
      }
      let st = pattern.source_types.first().copied()?;
      (
        SuggestionType::Routine,
        format!("Usual time for {} activity", st),
        format!(
          "You usually have {} activity {}. Related items may be useful right now.",
          st,
          temporal_constraint.describe()
        ),
      )
    }
    PatternKind::Spatial { location_key } => {
      let kind = kind_for_source_types(&pattern.source_types);
      let title = match kind {
        SuggestionType::Content => format!("Files relevant to your location ({})", location_key),
        _ => format!("Activity linked to {}", location_key),
      };
      (kind, title, pattern.description.clone())
    }
  };

  Some(build(kind, title, content, pattern.confidence, vec![pattern.id.clone()], now))
}

/// Map one correlation to a suggestion by its source-type pair.
pub fn from_correlation(c: &Correlation, now: DateTime<Utc>) -> Suggestion {
  let kind = kind_for_source_types(&c.source_types);
  let named = c
    .entities_involved
    .iter()
    .take(MAX_NAMED_ENTITIES)
    .cloned()
    .collect::<Vec<_>>()
    .join(", ");
  let (title, lead) = match kind {
    SuggestionType::Content => ("Files relevant to your location".to_string(), "You worked on these files here"),
    SuggestionType::SearchStrategy => (
      "Search strategy that led to your files".to_string(),
      "These searches were followed by file work",
    ),
    _ => (format!("Related activity across {}", join_types(&c.source_types)), "These happened together"),
  };
  let content = if named.is_empty() {
    format!("{}. {}.", lead, c.description)
  } else {
    format!("{}: {}. {}.", lead, named, c.description)
  };

  build(kind, title, content, c.confidence, vec![c.id.clone()], now)
}

fn build(
  kind: SuggestionType,
  title: String,
  content: String,
  confidence: f64,
  context: Vec<String>,
  now: DateTime<Utc>,
) -> Suggestion {
  Suggestion {
    id: fingerprint::suggestion_id(kind, &context, &now),
    suggestion_type: kind,
    title,
    content,
    priority: priority_for(kind, confidence),
    confidence,
    created_at: now,
    expires_at: now + expiry_for(kind),
    context,
    status: SuggestionStatus::Active,
  }
}

fn join_types(types: &[SourceType]) -> String {
  types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" + ")
}
