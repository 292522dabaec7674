//! Core types for the pattern engine (raw record contract + analysis models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Source types
// ---------------------------------------------------------------------------

/// Category of origin for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
  FileActivity,
  Collaboration,
  Location,
  Ambient,
  QueryLog,
}

impl SourceType {
  pub const ALL: [SourceType; 5] = [
    Self::FileActivity,
    Self::Collaboration,
    Self::Location,
    Self::Ambient,
    Self::QueryLog,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::FileActivity => "file_activity",
      Self::Collaboration => "collaboration",
      Self::Location => "location",
      Self::Ambient => "ambient",
      Self::QueryLog => "query_log",
    }
  }

  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
      "file_activity" | "file" | "files" => Some(Self::FileActivity),
      "collaboration" | "share" | "shares" => Some(Self::Collaboration),
      "location" | "gps" => Some(Self::Location),
      "ambient" | "sensor" => Some(Self::Ambient),
      "query_log" | "query" | "queries" => Some(Self::QueryLog),
      _ => None,
    }
  }
}

impl fmt::Display for SourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ---------------------------------------------------------------------------
// Raw records (JSON contract returned by a source fetch)
// ---------------------------------------------------------------------------

/// One raw record from a source. Unknown fields are silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum RawRecord {
  FileActivity(RawFileActivity),
  Collaboration(RawCollaboration),
  Location(RawLocation),
  Ambient(RawAmbient),
  QueryLog(RawQuery),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFileActivity {
  pub id: String,
  pub timestamp: String,
  pub path: String,
  pub action: String,
  #[serde(default)]
  pub size_bytes: Option<u64>,
  #[serde(default)]
  pub source_name: Option<String>,
  #[serde(default)]
  pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCollaboration {
  pub id: String,
  pub timestamp: String,
  pub file: String,
  pub sender: String,
  pub recipient: String,
  #[serde(default)]
  pub permission: Option<String>,
  #[serde(default)]
  pub source_name: Option<String>,
  #[serde(default)]
  pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLocation {
  pub id: String,
  pub timestamp: String,
  pub latitude: f64,
  pub longitude: f64,
  #[serde(default)]
  pub label: Option<String>,
  #[serde(default)]
  pub accuracy_m: Option<f64>,
  #[serde(default)]
  pub source_name: Option<String>,
  #[serde(default)]
  pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAmbient {
  pub id: String,
  pub timestamp: String,
  pub sensor: String,
  pub value: f64,
  #[serde(default)]
  pub unit: Option<String>,
  #[serde(default)]
  pub source_name: Option<String>,
  #[serde(default)]
  pub importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawQuery {
  pub id: String,
  pub timestamp: String,
  pub query: String,
  /// Output of an upstream intent parser, when one ran.
  #[serde(default)]
  pub intent: Option<QueryIntent>,
  #[serde(default)]
  pub source_name: Option<String>,
  #[serde(default)]
  pub importance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryIntent {
  #[serde(default)]
  pub action: Option<String>,
  #[serde(default)]
  pub entities: Vec<String>,
}

impl RawRecord {
  pub fn source_type(&self) -> SourceType {
    match self {
      Self::FileActivity(_) => SourceType::FileActivity,
      Self::Collaboration(_) => SourceType::Collaboration,
      Self::Location(_) => SourceType::Location,
      Self::Ambient(_) => SourceType::Ambient,
      Self::QueryLog(_) => SourceType::QueryLog,
    }
  }

  pub fn id(&self) -> &str {
    match self {
      Self::FileActivity(r) => &r.id,
      Self::Collaboration(r) => &r.id,
      Self::Location(r) => &r.id,
      Self::Ambient(r) => &r.id,
      Self::QueryLog(r) => &r.id,
    }
  }

  pub fn timestamp(&self) -> &str {
    match self {
      Self::FileActivity(r) => &r.timestamp,
      Self::Collaboration(r) => &r.timestamp,
      Self::Location(r) => &r.timestamp,
      Self::Ambient(r) => &r.timestamp,
      Self::QueryLog(r) => &r.timestamp,
    }
  }
}

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

/// Normalized, immutable record of one timestamped occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub id: String,
  pub source_type: SourceType,
  pub source_name: String,
  pub timestamp: DateTime<Utc>,
  pub event_type: String,
  pub attributes: BTreeMap<String, serde_json::Value>,
  pub entities: Vec<String>,
  pub importance: f64,
}

impl Event {
  /// Sequence tag used by the sequential miner: `source_type:event_type`.
  pub fn tag(&self) -> String {
    format!("{}:{}", self.source_type, self.event_type)
  }

  /// Rounded location id, present only on location events.
  pub fn location_id(&self) -> Option<&str> {
    self.attributes.get("location_id").and_then(|v| v.as_str())
  }
}

/// Place visited by the user, keyed by rounded coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationContext {
  pub location_id: String,
  pub latitude: f64,
  pub longitude: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  pub visit_count: u64,
  pub first_visit: DateTime<Utc>,
  pub last_visit: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Recurring time slot. Serializes as `{"hour":9}` or `{"day_of_week":0}` (Monday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalConstraint {
  Hour(u32),
  DayOfWeek(u32),
}

impl TemporalConstraint {
  pub fn describe(self) -> String {
    match self {
      Self::Hour(h) => format!("around {:02}:00", h),
      Self::DayOfWeek(d) => format!("on {}", weekday_name(d)),
    }
  }
}

pub fn weekday_name(day: u32) -> &'static str {
  match day {
    0 => "Mondays",
    1 => "Tuesdays",
    2 => "Wednesdays",
    3 => "Thursdays",
    4 => "Fridays",
    5 => "Saturdays",
    _ => "Sundays",
  }
}

/// What a pattern is keyed on. Exactly one shape per pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternKind {
  Sequential { event_signature: Vec<String> },
  Temporal { temporal_constraint: TemporalConstraint },
  Spatial { location_key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
  pub id: String,
  pub name: String,
  pub description: String,
  pub confidence: f64,
  pub source_types: Vec<SourceType>,
  pub kind: PatternKind,
  pub observation_count: u64,
  pub last_observed: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Correlations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
  pub id: String,
  pub source_event_ids: Vec<String>,
  /// Always at least two distinct source types.
  pub source_types: Vec<SourceType>,
  pub confidence: f64,
  pub relationship_type: String,
  pub entities_involved: Vec<String>,
  /// Start of the time window the correlation was observed in.
  pub timestamp: DateTime<Utc>,
  pub window_span_seconds: i64,
  pub description: String,
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
  /// Temporal pattern matching the current hour/day.
  Routine,
  /// Recurring multi-source sequence.
  Workflow,
  /// Files relevant to the current location.
  Content,
  /// Searches that tend to precede file work.
  SearchStrategy,
  CrossSource,
}

impl SuggestionType {
  pub const ALL: [SuggestionType; 5] = [
    Self::Routine,
    Self::Workflow,
    Self::Content,
    Self::SearchStrategy,
    Self::CrossSource,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Routine => "routine",
      Self::Workflow => "workflow",
      Self::Content => "content",
      Self::SearchStrategy => "search_strategy",
      Self::CrossSource => "cross_source",
    }
  }

  pub fn from_name(s: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|t| t.as_str() == s)
  }
}

impl fmt::Display for SuggestionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  Medium,
  High,
  Critical,
}

impl Priority {
  pub fn rank(self) -> u8 {
    match self {
      Self::Low => 0,
      Self::Medium => 1,
      Self::High => 2,
      Self::Critical => 3,
    }
  }

  /// One level up, stopping at `High`; `Critical` is never reached by promotion.
  pub fn promoted(self) -> Self {
    match self {
      Self::Low => Self::Medium,
      Self::Medium | Self::High => Self::High,
      Self::Critical => Self::Critical,
    }
  }
}

/// `Active -> {Expired | Dismissed | ActedUpon}`; all three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
  Active,
  Expired,
  Dismissed,
  ActedUpon,
}

impl SuggestionStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Active)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
  pub id: String,
  pub suggestion_type: SuggestionType,
  pub title: String,
  pub content: String,
  pub priority: Priority,
  pub confidence: f64,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  /// Provenance: ids of the patterns/correlations this was derived from.
  pub context: Vec<String>,
  pub status: SuggestionStatus,
}

impl Suggestion {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }

  pub fn dismissed(&self) -> bool {
    self.status == SuggestionStatus::Dismissed
  }

  pub fn acted_upon(&self) -> bool {
    self.status == SuggestionStatus::ActedUpon
  }

  /// Key identifying "the same suggestion" across cycles.
  pub fn provenance_key(&self) -> String {
    format!("{}|{}", self.suggestion_type, self.context.join(","))
  }
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
