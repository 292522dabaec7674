//! Normalize raw source records into canonical Events.
//!
//! One pure mapping function per `SourceType`; `normalize` dispatches on the
//! record's variant. A record that fails here is skipped on its own.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::types::*;

const QUERY_STOP_WORDS: &[&str] = &[
  "the", "and", "for", "with", "from", "that", "this", "what", "where", "when", "which", "who",
  "how", "are", "was", "were", "all", "any", "my", "me", "show", "find", "get", "list", "about",
  "into", "last", "have", "has", "you", "your", "our",
];

/// Parse and normalize a raw record into a canonical Event.
pub fn normalize(raw: &RawRecord, location_precision: u32) -> Result<Event, EngineError> {
  match raw {
    RawRecord::FileActivity(r) => normalize_file_activity(r),
    RawRecord::Collaboration(r) => normalize_collaboration(r),
    RawRecord::Location(r) => normalize_location(r, location_precision),
    RawRecord::Ambient(r) => normalize_ambient(r),
    RawRecord::QueryLog(r) => normalize_query(r),
  }
}

pub fn normalize_file_activity(r: &RawFileActivity) -> Result<Event, EngineError> {
  require("id", &r.id)?;
  require("path", &r.path)?;
  require("action", &r.action)?;
  let timestamp = parse_timestamp(&r.timestamp)?;

  let path = normalize_path(&r.path);
  let action = r.action.trim().to_ascii_lowercase();
  let mut attributes = BTreeMap::new();
  attributes.insert("path".to_string(), json!(path));
  attributes.insert("action".to_string(), json!(action));
  if let Some(ext) = extension(&path) {
    attributes.insert("extension".to_string(), json!(ext));
  }
  if let Some(size) = r.size_bytes {
    attributes.insert("size_bytes".to_string(), json!(size));
  }

  let default_importance = match action.as_str() {
    "create" | "created" | "delete" | "deleted" => 0.6,
    _ => 0.5,
  };

  Ok(Event {
    id: event_id(SourceType::FileActivity, &r.id),
    source_type: SourceType::FileActivity,
    source_name: source_name(&r.source_name, SourceType::FileActivity),
    timestamp,
    event_type: action,
    attributes,
    entities: vec![path],
    importance: importance(r.importance, default_importance),
  })
}

pub fn normalize_collaboration(r: &RawCollaboration) -> Result<Event, EngineError> {
  require("id", &r.id)?;
  require("file", &r.file)?;
  require("sender", &r.sender)?;
  require("recipient", &r.recipient)?;
  let timestamp = parse_timestamp(&r.timestamp)?;

  let file = normalize_path(&r.file);
  let sender = r.sender.trim().to_ascii_lowercase();
  let recipient = r.recipient.trim().to_ascii_lowercase();
  let mut attributes = BTreeMap::new();
  attributes.insert("file".to_string(), json!(file));
  attributes.insert("sender".to_string(), json!(sender));
  attributes.insert("recipient".to_string(), json!(recipient));
  if let Some(p) = &r.permission {
    attributes.insert("permission".to_string(), json!(p.to_ascii_lowercase()));
  }

  Ok(Event {
    id: event_id(SourceType::Collaboration, &r.id),
    source_type: SourceType::Collaboration,
    source_name: source_name(&r.source_name, SourceType::Collaboration),
    timestamp,
    event_type: "share".to_string(),
    attributes,
    entities: vec![file, sender, recipient],
    importance: importance(r.importance, 0.7),
  })
}

pub fn normalize_location(r: &RawLocation, precision: u32) -> Result<Event, EngineError> {
  require("id", &r.id)?;
  let timestamp = parse_timestamp(&r.timestamp)?;
  if !r.latitude.is_finite() || !(-90.0..=90.0).contains(&r.latitude) {
    return Err(EngineError::malformed("latitude", "expected -90..90"));
  }
  if !r.longitude.is_finite() || !(-180.0..=180.0).contains(&r.longitude) {
    return Err(EngineError::malformed("longitude", "expected -180..180"));
  }

  let location_id = location_id(r.latitude, r.longitude, precision);
  let mut attributes = BTreeMap::new();
  attributes.insert("coordinates".to_string(), json!([r.latitude, r.longitude]));
  attributes.insert("location_id".to_string(), json!(location_id));
  if let Some(acc) = r.accuracy_m {
    attributes.insert("accuracy_m".to_string(), json!(acc));
  }
  let mut entities = vec![location_id];
  if let Some(label) = r.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
    attributes.insert("label".to_string(), json!(label));
    entities.push(label.to_string());
  }

  Ok(Event {
    id: event_id(SourceType::Location, &r.id),
    source_type: SourceType::Location,
    source_name: source_name(&r.source_name, SourceType::Location),
    timestamp,
    event_type: "visit".to_string(),
    attributes,
    entities,
    importance: importance(r.importance, 0.4),
  })
}

pub fn normalize_ambient(r: &RawAmbient) -> Result<Event, EngineError> {
  require("id", &r.id)?;
  require("sensor", &r.sensor)?;
  let timestamp = parse_timestamp(&r.timestamp)?;
  if !r.value.is_finite() {
    return Err(EngineError::malformed("value", "must be a finite number"));
  }

  let sensor = r.sensor.trim().to_ascii_lowercase();
  let mut attributes = BTreeMap::new();
  attributes.insert("value".to_string(), json!(r.value));
  if let Some(unit) = &r.unit {
    attributes.insert("unit".to_string(), json!(unit));
  }

  Ok(Event {
    id: event_id(SourceType::Ambient, &r.id),
    source_type: SourceType::Ambient,
    source_name: source_name(&r.source_name, SourceType::Ambient),
    timestamp,
    event_type: sensor.clone(),
    attributes,
    entities: vec![sensor],
    importance: importance(r.importance, 0.3),
  })
}

pub fn normalize_query(r: &RawQuery) -> Result<Event, EngineError> {
  require("id", &r.id)?;
  require("query", &r.query)?;
  let timestamp = parse_timestamp(&r.timestamp)?;

  let mut attributes = BTreeMap::new();
  attributes.insert("query".to_string(), json!(r.query.trim()));

  // Prefer the upstream intent; fall back to plain keywords.
  let (event_type, entities) = match &r.intent {
    Some(intent) if !intent.entities.is_empty() => {
      let action = intent
        .action
        .as_deref()
        .map(|a| a.trim().to_ascii_lowercase())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "search".to_string());
      attributes.insert("intent".to_string(), Value::String(action.clone()));
      (action, dedup(intent.entities.iter().map(|e| e.trim().to_ascii_lowercase())))
    }
    _ => ("search".to_string(), extract_keywords(&r.query)),
  };

  Ok(Event {
    id: event_id(SourceType::QueryLog, &r.id),
    source_type: SourceType::QueryLog,
    source_name: source_name(&r.source_name, SourceType::QueryLog),
    timestamp,
    event_type,
    attributes,
    entities,
    importance: importance(r.importance, 0.6),
  })
}

/// Namespaced event id so raw ids from different sources never collide.
pub fn event_id(source_type: SourceType, raw_id: &str) -> String {
  format!("{}:{}", source_type, raw_id.trim())
}

/// Rounded `"lat,lon"` key; nearby fixes collapse into the same place.
pub fn location_id(latitude: f64, longitude: f64, precision: u32) -> String {
  let p = precision as usize;
  // -0.000 and 0.000 must be the same place.
  let lat = round_to(latitude, precision) + 0.0;
  let lon = round_to(longitude, precision) + 0.0;
  format!("{:.*},{:.*}", p, lat, p, lon)
}

fn round_to(v: f64, precision: u32) -> f64 {
  let factor = 10f64.powi(precision as i32);
  (v * factor).round() / factor
}

/// Lowercase alphanumeric tokens, minus stop words, first occurrence order.
pub fn extract_keywords(query: &str) -> Vec<String> {
  dedup(
    query
      .split(|c: char| !c.is_alphanumeric())
      .map(|t| t.to_lowercase())
      .filter(|t| t.chars().count() >= 3 && !QUERY_STOP_WORDS.contains(&t.as_str())),
  )
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for item in items {
    if !item.is_empty() && !out.contains(&item) {
      out.push(item);
    }
  }
  out
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
  Ok(
    DateTime::parse_from_rfc3339(raw.trim())
      .map_err(|e| EngineError::malformed("timestamp", &format!("invalid RFC3339: {}", e)))?
      .with_timezone(&Utc),
  )
}

fn require(field: &str, value: &str) -> Result<(), EngineError> {
  if value.trim().is_empty() {
    return Err(EngineError::malformed(field, "must not be empty"));
  }
  Ok(())
}

fn source_name(raw: &Option<String>, source_type: SourceType) -> String {
  raw
    .as_deref()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| source_type.as_str().to_string())
}

fn importance(raw: Option<f64>, default: f64) -> f64 {
  raw.filter(|v| v.is_finite()).unwrap_or(default).clamp(0.0, 1.0)
}

fn extension(path: &str) -> Option<String> {
  let name = path.rsplit('/').next()?;
  let (stem, ext) = name.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

/// Normalize a file path for stable comparison:
/// - backslash -> forward slash
/// - collapse repeated slashes
/// - strip leading ./
fn normalize_path(p: &str) -> String {
  let s = p.trim().replace('\\', "/");
  let mut out = String::with_capacity(s.len());
  let mut prev_slash = false;
  for ch in s.chars() {
    if ch == '/' {
      if !prev_slash {
        out.push('/');
      }
      prev_slash = true;
    } else {
      prev_slash = false;
      out.push(ch);
    }
  }
  out.strip_prefix("./").unwrap_or(&out).to_string()
}
