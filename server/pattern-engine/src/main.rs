//! Binary entrypoint: read JSON lines from stdin, write JSON lines to stdout.
//!
//! Each input line carries a `kind`:
//! - `record`: a raw source record (tagged by `source_type`), buffered until the next analyze
//! - `analyze`: run one cycle (`max`, optional `now`) and print each ranked suggestion
//! - `feedback`: apply `value` to `suggestion_id` and print the outcome
//!
//! Invalid lines produce an ErrorOutput line. Logs go to stderr.

use chrono::{DateTime, Utc};
use pattern_engine::collector::MemorySource;
use pattern_engine::insight::LogSink;
use pattern_engine::types::ErrorOutput;
use pattern_engine::{Config, Engine, EngineError, RawRecord, SourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

const DEFAULT_MAX_SUGGESTIONS: usize = 10;

#[derive(Serialize)]
struct FeedbackLine<'a> {
  suggestion_id: &'a str,
  outcome: pattern_engine::FeedbackOutcome,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pattern_engine=info")),
    )
    .init();

  let config = match std::env::args().nth(1) {
    Some(path) => match Config::from_path(&path) {
      Ok(c) => c,
      Err(e) => {
        let _ = writeln!(io::stderr(), "pattern-engine: {}", e);
        std::process::exit(2);
      }
    },
    None => Config::default(),
  };
  let mut engine = match Engine::new(config) {
    Ok(e) => e.with_insight_sink(Arc::new(LogSink)),
    Err(e) => {
      let _ = writeln!(io::stderr(), "pattern-engine: {}", e);
      std::process::exit(2);
    }
  };

  let mut sources: BTreeMap<SourceType, Arc<MemorySource>> = BTreeMap::new();
  for st in SourceType::ALL {
    let source = Arc::new(MemorySource::new(st));
    engine.add_source(source.clone());
    sources.insert(st, source);
  }

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  for line in stdin.lock().lines() {
    let line = match line {
      Ok(l) => l,
      Err(e) => {
        let _ = writeln!(io::stderr(), "pattern-engine: read error: {}", e);
        std::process::exit(1);
      }
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    if let Err(e) = handle_line(trimmed, &mut engine, &sources, &mut out).await {
      let err = match &e {
        EngineError::MalformedRecord { field, reason } | EngineError::Configuration { field, reason } => {
          ErrorOutput::new(reason.clone()).with_field(field.clone())
        }
        _ => ErrorOutput::new(e.to_string()),
      };
      emit(&mut out, &err);
    }
  }

  let _ = out.flush();
}

async fn handle_line(
  line: &str,
  engine: &mut Engine,
  sources: &BTreeMap<SourceType, Arc<MemorySource>>,
  out: &mut impl Write,
) -> Result<(), EngineError> {
  let value: Value = serde_json::from_str(line)?;
  let kind = value
    .get("kind")
    .and_then(Value::as_str)
    .ok_or_else(|| EngineError::malformed("kind", "missing line kind"))?;

  match kind {
    "record" => {
      let record = RawRecord::deserialize(&value)?;
      if let Some(source) = sources.get(&record.source_type()) {
        source.push(record);
      }
    }
    "analyze" => {
      let max = value
        .get("max")
        .and_then(Value::as_u64)
        .map(|m| m as usize)
        .unwrap_or(DEFAULT_MAX_SUGGESTIONS);
      let now = parse_now(&value)?;
      engine.run_cycle_at(now).await;
      for suggestion in engine.get_suggestions_at(max, now) {
        emit(out, &suggestion);
      }
    }
    "feedback" => {
      let suggestion_id = value
        .get("suggestion_id")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::malformed("suggestion_id", "missing suggestion_id"))?;
      // Non-numeric feedback counts as neutral.
      let signal = value.get("value").and_then(Value::as_f64).unwrap_or(0.0);
      let now = parse_now(&value)?;
      let outcome = engine.record_feedback_at(suggestion_id, signal, now);
      emit(out, &FeedbackLine { suggestion_id, outcome });
    }
    other => {
      return Err(EngineError::malformed("kind", &format!("unknown line kind '{}'", other)));
    }
  }
  Ok(())
}

fn parse_now(value: &Value) -> Result<DateTime<Utc>, EngineError> {
  match value.get("now").and_then(Value::as_str) {
    Some(raw) => DateTime::parse_from_rfc3339(raw)
      .map(|t| t.with_timezone(&Utc))
      .map_err(|e| EngineError::malformed("now", &format!("invalid RFC3339: {}", e))),
    None => Ok(Utc::now()),
  }
}

fn emit(out: &mut impl Write, value: &impl Serialize) {
  let _ = serde_json::to_writer(&mut *out, value);
  let _ = writeln!(out);
}
