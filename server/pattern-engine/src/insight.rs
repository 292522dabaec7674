//! One-way export of confident patterns and correlations to long-term memory.

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::Config;
use crate::types::{Correlation, Pattern};

pub const CATEGORY_PATTERN: &str = "pattern";
pub const CATEGORY_CORRELATION: &str = "correlation";

/// External long-term-memory collaborator. Fire-and-forget.
pub trait InsightSink: Send + Sync {
  fn add_insight(&self, category: &str, text: &str, confidence: f64);
}

/// Push the records that clear their export threshold. Returns how many were sent.
pub fn export<'a>(
  sink: &dyn InsightSink,
  patterns: impl IntoIterator<Item = &'a Pattern>,
  correlations: impl IntoIterator<Item = &'a Correlation>,
  config: &Config,
) -> usize {
  let mut sent = 0;
  for p in patterns {
    if p.confidence >= config.pattern_insight_threshold {
      sink.add_insight(CATEGORY_PATTERN, &format!("{}: {}", p.name, p.description), p.confidence);
      sent += 1;
    }
  }
  for c in correlations {
    if c.confidence >= config.correlation_insight_threshold {
      sink.add_insight(CATEGORY_CORRELATION, &c.description, c.confidence);
      sent += 1;
    }
  }
  sent
}

/// Sink that writes insights to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl InsightSink for LogSink {
  fn add_insight(&self, category: &str, text: &str, confidence: f64) {
    tracing::info!(category, confidence, "insight: {}", text);
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
  pub category: String,
  pub text: String,
  pub confidence: f64,
}

/// Sink that keeps every insight in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
  insights: Mutex<Vec<Insight>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insights(&self) -> Vec<Insight> {
    self.insights.lock().clone()
  }
}

impl InsightSink for MemorySink {
  fn add_insight(&self, category: &str, text: &str, confidence: f64) {
    self.insights.lock().push(Insight {
      category: category.to_string(),
      text: text.to_string(),
      confidence,
    });
  }
}
