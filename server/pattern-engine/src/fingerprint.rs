//! Stable ids for patterns, correlations and suggestions.
//!
//! Uses blake3 so the same observation always hashes to the same id across
//! cycles and process restarts.

use chrono::{DateTime, Utc};

use crate::types::{SourceType, SuggestionType};

fn short_hex(hasher: blake3::Hasher, len: usize) -> String {
  let hex = hasher.finalize().to_hex();
  hex[..len].to_string()
}

/// Pattern id from the canonical form of its index key.
pub fn pattern_id(canonical_key: &str) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(b"pattern|");
  hasher.update(canonical_key.as_bytes());
  format!("pat-{}", short_hex(hasher, 16))
}

/// Correlation id: source-type pair (order-insensitive) + the window's first event.
///
/// Later events joining the window do not change the id.
pub fn correlation_id(pair: (SourceType, SourceType), anchor_event_id: &str) -> String {
  let (a, b) = if pair.0 <= pair.1 { pair } else { (pair.1, pair.0) };
  let mut hasher = blake3::Hasher::new();
  hasher.update(a.as_str().as_bytes());
  hasher.update(b"+");
  hasher.update(b.as_str().as_bytes());
  hasher.update(b"@");
  hasher.update(anchor_event_id.as_bytes());
  format!("cor-{}", short_hex(hasher, 16))
}

/// Suggestion id: type + provenance + creation minute.
pub fn suggestion_id(kind: SuggestionType, context: &[String], created_at: &DateTime<Utc>) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(kind.as_str().as_bytes());
  for id in context {
    hasher.update(b"|");
    hasher.update(id.as_bytes());
  }
  hasher.update(b"@");
  hasher.update(created_at.format("%Y-%m-%dT%H:%M").to_string().as_bytes());
  format!("sug-{}", short_hex(hasher, 16))
}
