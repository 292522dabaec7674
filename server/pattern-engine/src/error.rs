//! Structured error types for the pattern engine.
//!
//! Only `Configuration` escapes the engine; the others are caught at the
//! narrowest scope (one source, one record, one feedback call) and logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("configuration: {field}: {reason}")]
  Configuration { field: String, reason: String },

  #[error("source fetch: {source_name}: {reason}")]
  SourceFetch { source_name: String, reason: String },

  #[error("source fetch: {source_name}: timed out after {after_ms}ms")]
  Timeout { source_name: String, after_ms: u64 },

  #[error("malformed record: {field}: {reason}")]
  MalformedRecord { field: String, reason: String },

  #[error("feedback target not found: {0}")]
  FeedbackTargetNotFound(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),
}

impl EngineError {
  pub fn configuration(field: &str, reason: &str) -> Self {
    Self::Configuration {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn source_fetch(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::SourceFetch {
      source_name: source_name.into(),
      reason: reason.into(),
    }
  }

  pub fn malformed(field: &str, reason: &str) -> Self {
    Self::MalformedRecord {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  /// True for errors that must be surfaced to the caller rather than logged and skipped.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::Configuration { .. } | Self::Json(_) | Self::Io(_))
  }
}
