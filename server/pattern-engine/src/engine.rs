//! Core engine: owns the analysis state and runs collect -> timeline ->
//! mine/correlate -> suggest cycles. Feedback goes through the shared board
//! and may arrive at any time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collector::{Collector, EventSource};
use crate::config::Config;
use crate::correlation::{self, CorrelationStore};
use crate::error::EngineError;
use crate::feedback::{FeedbackHandle, FeedbackOutcome, FeedbackStats, SharedBoard, SuggestionBoard};
use crate::insight::{self, InsightSink};
use crate::patterns::{self, PatternStore};
use crate::snapshot::{EngineSnapshot, SNAPSHOT_VERSION};
use crate::state::AnalysisState;
use crate::stats::SourceStats;
use crate::suggest;
use crate::types::*;

/// What one analysis cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
  pub new_events: usize,
  pub evicted_events: usize,
  pub patterns_upserted: usize,
  pub correlations_created: usize,
  pub correlations_extended: usize,
  pub suggestions_created: usize,
  pub insights_exported: usize,
  pub failed_sources: Vec<String>,
}

/// The pattern engine. One instance owns one analysis state.
pub struct Engine {
  config: Config,
  collector: Collector,
  state: AnalysisState,
  board: SharedBoard,
  insights: Option<Arc<dyn InsightSink>>,
}

impl Engine {
  /// Validate `config` and build an empty engine. Configuration errors are fatal.
  pub fn new(config: Config) -> Result<Self, EngineError> {
    config.validate()?;
    let board = SuggestionBoard::from_config(&config)?;
    Ok(Self::assemble(config, board))
  }

  pub fn with_defaults() -> Self {
    let config = Config::default();
    let board = SuggestionBoard::new(
      crate::config::default_thresholds(),
      crate::feedback::FeedbackPolicy::from_config(&config),
    );
    Self::assemble(config, board)
  }

  fn assemble(config: Config, board: SuggestionBoard) -> Self {
    Self {
      config,
      collector: Collector::new(),
      state: AnalysisState::new(),
      board: Arc::new(Mutex::new(board)),
      insights: None,
    }
  }

  pub fn with_insight_sink(mut self, sink: Arc<dyn InsightSink>) -> Self {
    self.insights = Some(sink);
    self
  }

  pub fn add_source(&mut self, source: Arc<dyn EventSource>) {
    tracing::debug!(source = source.name(), source_type = %source.source_type(), "source registered");
    self.collector.register(source);
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  // -------------------------------------------------------------------------
  // Cycle
  // -------------------------------------------------------------------------

  /// Fetch new events from every source. Returns how many were added.
  pub async fn collect(&mut self, max_events_per_source: usize) -> usize {
    self
      .collector
      .collect(&mut self.state, max_events_per_source, &self.config)
      .await
      .new_events
  }

  pub fn rebuild_timeline(&mut self) {
    self.state.rebuild_timeline();
  }

  pub async fn run_cycle(&mut self) -> CycleReport {
    self.run_cycle_at(Utc::now()).await
  }

  /// One full cycle with an explicit clock.
  pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleReport {
    let collected = self
      .collector
      .collect(&mut self.state, self.config.max_events_per_source, &self.config)
      .await;
    self.state.rebuild_timeline();

    let mut report = self.analyze(now);
    report.new_events = collected.new_events;
    report.evicted_events = collected.evicted_events;
    report.failed_sources = collected.failed_sources;

    tracing::info!(
      new_events = report.new_events,
      patterns = report.patterns_upserted,
      correlations = report.correlations_created,
      correlations_extended = report.correlations_extended,
      suggestions = report.suggestions_created,
      failed_sources = report.failed_sources.len(),
      "analysis cycle finished"
    );
    report
  }

  /// Mine, correlate, export and generate over the current timeline.
  fn analyze(&mut self, now: DateTime<Utc>) -> CycleReport {
    let state = &mut self.state;
    let events = state.timeline.events(&state.events);

    let upserted = patterns::mine_all(&mut state.patterns, &events, &state.locations, &self.config, now);
    let detected = correlation::detect(&events, &self.config);
    let merged = state.correlations.merge(detected, self.config.max_correlations);

    // Extended windows keep their record and their suggestion.
    let new_correlations: Vec<Correlation> = merged
      .created
      .iter()
      .filter_map(|id| state.correlations.get(id))
      .cloned()
      .collect();

    let insights_exported = match &self.insights {
      Some(sink) => insight::export(
        sink.as_ref(),
        upserted
          .iter()
          .filter(|u| u.first_reached(self.config.pattern_insight_threshold))
          .filter_map(|u| state.patterns.get(&u.id)),
        &new_correlations,
        &self.config,
      ),
      None => 0,
    };

    // Feedback recorded before this point is visible to generation.
    let thresholds = self.board.lock().thresholds().clone();
    let fresh = suggest::generate(
      state.patterns.patterns(),
      &new_correlations,
      &thresholds,
      now,
      &self.config.offset(),
    );
    let suggestions_created = self.board.lock().publish(fresh, now);

    CycleReport {
      patterns_upserted: upserted.len(),
      correlations_created: merged.created.len(),
      correlations_extended: merged.extended.len(),
      suggestions_created,
      insights_exported,
      ..CycleReport::default()
    }
  }

  // -------------------------------------------------------------------------
  // Consumer surface
  // -------------------------------------------------------------------------

  pub fn get_suggestions(&self, max: usize) -> Vec<Suggestion> {
    self.get_suggestions_at(max, Utc::now())
  }

  pub fn get_suggestions_at(&self, max: usize, now: DateTime<Utc>) -> Vec<Suggestion> {
    self.board.lock().ranked(max, now)
  }

  pub fn record_feedback(&self, suggestion_id: &str, value: f64) -> FeedbackOutcome {
    self.record_feedback_at(suggestion_id, value, Utc::now())
  }

  pub fn record_feedback_at(&self, suggestion_id: &str, value: f64, now: DateTime<Utc>) -> FeedbackOutcome {
    self.board.lock().record_feedback(suggestion_id, value, now)
  }

  /// Handle for recording feedback from another task.
  pub fn feedback_handle(&self) -> FeedbackHandle {
    FeedbackHandle::new(Arc::clone(&self.board))
  }

  pub fn feedback_report(&self) -> Vec<FeedbackStats> {
    self.board.lock().report()
  }

  pub fn threshold(&self, kind: SuggestionType) -> f64 {
    self.board.lock().threshold(kind)
  }

  pub fn patterns(&self) -> &[Pattern] {
    self.state.patterns.patterns()
  }

  pub fn correlations(&self) -> &[Correlation] {
    self.state.correlations.correlations()
  }

  pub fn locations(&self) -> &BTreeMap<String, LocationContext> {
    &self.state.locations
  }

  pub fn source_stats(&self) -> &BTreeMap<String, SourceStats> {
    &self.state.source_stats
  }

  pub fn watermarks(&self) -> &BTreeMap<String, DateTime<Utc>> {
    self.collector.watermarks()
  }

  /// Ordered events of the last rebuilt timeline.
  pub fn timeline(&self) -> Vec<&Event> {
    self.state.timeline.events(&self.state.events)
  }

  pub fn event_count(&self) -> usize {
    self.state.events.len()
  }

  // -------------------------------------------------------------------------
  // Persistence
  // -------------------------------------------------------------------------

  pub fn snapshot(&self) -> EngineSnapshot {
    let board = self.board.lock();
    EngineSnapshot {
      version: SNAPSHOT_VERSION,
      watermarks: self.collector.watermarks().clone(),
      source_stats: self.state.source_stats.clone(),
      locations: self.state.locations.clone(),
      patterns: self.state.patterns.patterns().to_vec(),
      correlations: self.state.correlations.correlations().to_vec(),
      thresholds: board.thresholds().clone(),
      feedback: board.counts().clone(),
      suppressed: board.suppressed().clone(),
    }
  }

  /// Build an engine from `config` and a persisted snapshot. Sources are registered afterwards.
  pub fn restore(config: Config, snapshot: EngineSnapshot) -> Result<Self, EngineError> {
    snapshot.validate()?;
    let mut engine = Self::new(config)?;
    let max_correlations = engine.config.max_correlations;

    engine.collector.restore_watermarks(snapshot.watermarks);
    engine.state.source_stats = snapshot.source_stats;
    engine.state.locations = snapshot.locations;
    engine.state.patterns = PatternStore::from_patterns(snapshot.patterns);
    engine.state.correlations = CorrelationStore::from_correlations(snapshot.correlations, max_correlations);
    engine
      .board
      .lock()
      .restore(snapshot.thresholds, snapshot.feedback, snapshot.suppressed);

    tracing::info!(
      patterns = engine.state.patterns.len(),
      correlations = engine.state.correlations.len(),
      "engine state restored"
    );
    Ok(engine)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::MemorySource;
  use crate::insight::MemorySink;
  use chrono::{Duration, TimeZone};

  fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
  }

  fn make_query(id: usize, ts: DateTime<Utc>) -> RawRecord {
    RawRecord::QueryLog(RawQuery {
      id: format!("q{}", id),
      timestamp: ts.to_rfc3339(),
      query: "quarterly budget report".into(),
      intent: None,
      source_name: None,
      importance: None,
    })
  }

  fn make_file(id: usize, ts: DateTime<Utc>) -> RawRecord {
    RawRecord::FileActivity(RawFileActivity {
      id: format!("f{}", id),
      timestamp: ts.to_rfc3339(),
      path: "reports/budget.xlsx".into(),
      action: "open".into(),
      size_bytes: None,
      source_name: None,
      importance: None,
    })
  }

  fn make_engine() -> (Engine, Arc<MemorySource>, Arc<MemorySource>) {
    let mut engine = Engine::with_defaults();
    let queries = Arc::new(MemorySource::new(SourceType::QueryLog));
    let files = Arc::new(MemorySource::new(SourceType::FileActivity));
    engine.add_source(queries.clone());
    engine.add_source(files.clone());
    (engine, queries, files)
  }

  #[test]
  fn unknown_threshold_type_is_fatal() {
    let mut config = Config::default();
    config.thresholds.insert("telepathy".into(), 0.7);
    let err = Engine::new(config).err().unwrap();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("telepathy"));
  }

  #[tokio::test]
  async fn query_then_file_yields_search_strategy_suggestion() {
    let (mut engine, queries, files) = make_engine();
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));

    let report = engine.run_cycle_at(base() + Duration::minutes(2)).await;
    assert_eq!(report.new_events, 2);
    assert_eq!(report.correlations_created, 1);

    let suggestions = engine.get_suggestions_at(10, base() + Duration::minutes(2));
    let search: Vec<_> = suggestions
      .iter()
      .filter(|s| s.suggestion_type == SuggestionType::SearchStrategy)
      .collect();
    assert_eq!(search.len(), 1);
    assert!(search[0].confidence >= engine.threshold(SuggestionType::SearchStrategy));
    assert_eq!(search[0].expires_at - search[0].created_at, Duration::days(1));
  }

  #[tokio::test]
  async fn second_cycle_does_not_duplicate_correlations_or_suggestions() {
    let (mut engine, queries, files) = make_engine();
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));
    let now = base() + Duration::minutes(2);

    engine.run_cycle_at(now).await;
    let second = engine.run_cycle_at(now + Duration::minutes(1)).await;
    assert_eq!(second.new_events, 0);
    assert_eq!(second.correlations_created, 0);
    assert_eq!(engine.correlations().len(), 1);
    assert_eq!(engine.get_suggestions_at(10, now).len(), 1);
  }

  fn search_suggestions(engine: &Engine, now: DateTime<Utc>) -> usize {
    engine
      .get_suggestions_at(10, now)
      .iter()
      .filter(|s| s.suggestion_type == SuggestionType::SearchStrategy)
      .count()
  }

  #[tokio::test]
  async fn burst_split_across_cycles_extends_one_correlation() {
    let (mut engine, queries, files) = make_engine();
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));
    let first = engine.run_cycle_at(base() + Duration::minutes(2)).await;
    assert_eq!(first.correlations_created, 1);
    let id = engine.correlations()[0].id.clone();

    files.push(make_file(2, base() + Duration::minutes(3)));
    let now = base() + Duration::minutes(4);
    let second = engine.run_cycle_at(now).await;
    assert_eq!(second.new_events, 1);
    assert_eq!(second.correlations_created, 0);
    assert_eq!(second.correlations_extended, 1);

    assert_eq!(engine.correlations().len(), 1);
    let c = &engine.correlations()[0];
    assert_eq!(c.id, id);
    assert_eq!(c.source_event_ids.len(), 3);
    assert_eq!(c.window_span_seconds, 180);
    assert_eq!(search_suggestions(&engine, now), 1);
  }

  #[tokio::test]
  async fn window_trimmed_by_eviction_keeps_one_correlation() {
    let config = Config {
      max_events: 3,
      ..Config::default()
    };
    let mut engine = Engine::new(config).unwrap();
    let queries = Arc::new(MemorySource::new(SourceType::QueryLog));
    let files = Arc::new(MemorySource::new(SourceType::FileActivity));
    engine.add_source(queries.clone());
    engine.add_source(files.clone());

    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));
    queries.push(make_query(2, base() + Duration::minutes(2)));
    engine.run_cycle_at(base() + Duration::minutes(3)).await;
    assert_eq!(engine.correlations().len(), 1);

    // q1 is evicted; the window now starts at f1.
    files.push(make_file(2, base() + Duration::minutes(4)));
    let now = base() + Duration::minutes(5);
    let report = engine.run_cycle_at(now).await;
    assert_eq!(report.evicted_events, 1);
    assert_eq!(report.correlations_created, 0);

    assert_eq!(engine.correlations().len(), 1);
    assert!(engine.correlations()[0].source_event_ids.contains(&"f2".to_string()));
    assert_eq!(search_suggestions(&engine, now), 1);
  }

  #[tokio::test]
  async fn insights_are_not_reexported_on_later_cycles() {
    let sink = Arc::new(MemorySink::new());
    let (engine, queries, files) = make_engine();
    let mut engine = engine.with_insight_sink(sink.clone());
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));
    let now = base() + Duration::minutes(2);

    assert_eq!(engine.run_cycle_at(now).await.insights_exported, 1);
    assert_eq!(engine.run_cycle_at(now + Duration::minutes(1)).await.insights_exported, 0);

    files.push(make_file(2, base() + Duration::minutes(3)));
    engine.run_cycle_at(now + Duration::minutes(2)).await;
    let correlation_insights = sink
      .insights()
      .iter()
      .filter(|i| i.category == insight::CATEGORY_CORRELATION)
      .count();
    assert_eq!(correlation_insights, 1);
  }

  #[test]
  fn restore_rejects_bad_snapshot_as_configuration() {
    let mut snapshot = Engine::with_defaults().snapshot();
    snapshot.version = 7;
    let err = Engine::restore(Config::default(), snapshot).err().unwrap();
    assert!(matches!(err, EngineError::Configuration { .. }));
    assert!(err.is_fatal());
  }

  #[tokio::test]
  async fn insights_exported_for_confident_records() {
    let sink = Arc::new(MemorySink::new());
    let (engine, queries, files) = make_engine();
    let mut engine = engine.with_insight_sink(sink.clone());
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));

    let report = engine.run_cycle_at(base() + Duration::minutes(2)).await;
    // 60s span in a 15 minute window: 0.6 + 0.4 * (1 - 60/900) = 0.973
    assert_eq!(report.insights_exported, 1);
    assert_eq!(sink.insights()[0].category, insight::CATEGORY_CORRELATION);
  }

  #[tokio::test]
  async fn snapshot_restores_learning_state() {
    let (mut engine, queries, files) = make_engine();
    queries.push(make_query(1, base()));
    files.push(make_file(1, base() + Duration::minutes(1)));
    let now = base() + Duration::minutes(2);
    engine.run_cycle_at(now).await;
    let id = engine.get_suggestions_at(10, now)[0].id.clone();
    assert_eq!(engine.record_feedback_at(&id, 1.0, now), FeedbackOutcome::Accepted);

    let json = engine.snapshot().to_json().unwrap();
    let restored = Engine::restore(Config::default(), EngineSnapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(restored.correlations()[0].id, engine.correlations()[0].id);
    assert_eq!(restored.watermarks(), engine.watermarks());
    assert_eq!(restored.source_stats(), engine.source_stats());
    assert!((restored.threshold(SuggestionType::SearchStrategy) - 0.55).abs() < 1e-9);
    assert_eq!(restored.snapshot().suppressed, engine.snapshot().suppressed);
  }
}
