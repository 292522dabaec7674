//! Integration tests for the pattern engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pattern_engine::insight::MemorySink;
use pattern_engine::types::{PatternKind, TemporalConstraint};
use pattern_engine::{
  Config, Engine, EngineError, EngineSnapshot, EventSource, FeedbackOutcome, MemorySource, RawRecord, SourceType,
  SuggestionType,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

fn monday_9am() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

fn file_record(id: usize, ts: DateTime<Utc>) -> RawRecord {
  serde_json::from_value(json!({
    "source_type": "file_activity",
    "id": format!("f{}", id),
    "timestamp": ts.to_rfc3339(),
    "path": "projects/atlas/plan.md",
    "action": "modified"
  }))
  .unwrap()
}

fn location_record(id: usize, ts: DateTime<Utc>) -> RawRecord {
  serde_json::from_value(json!({
    "source_type": "location",
    "id": format!("l{}", id),
    "timestamp": ts.to_rfc3339(),
    "latitude": 52.5200,
    "longitude": 13.4050,
    "label": "Office"
  }))
  .unwrap()
}

fn query_record(id: usize, ts: DateTime<Utc>) -> RawRecord {
  serde_json::from_value(json!({
    "source_type": "query_log",
    "id": format!("q{}", id),
    "timestamp": ts.to_rfc3339(),
    "query": "show me the atlas roadmap"
  }))
  .unwrap()
}

struct Fixture {
  engine: Engine,
  files: Arc<MemorySource>,
  places: Arc<MemorySource>,
  queries: Arc<MemorySource>,
}

fn make_fixture(config: Config) -> Fixture {
  let mut engine = Engine::new(config).unwrap();
  let files = Arc::new(MemorySource::new(SourceType::FileActivity));
  let places = Arc::new(MemorySource::new(SourceType::Location));
  let queries = Arc::new(MemorySource::new(SourceType::QueryLog));
  engine.add_source(files.clone());
  engine.add_source(places.clone());
  engine.add_source(queries.clone());
  Fixture {
    engine,
    files,
    places,
    queries,
  }
}

/// 25 events alternating file/location at 2-minute spacing, in three bursts an hour apart.
fn load_bursts(fx: &Fixture) {
  let bursts = [(0usize, 8usize), (8, 8), (16, 9)];
  for (burst, &(first, len)) in bursts.iter().enumerate() {
    let start = monday_9am() + Duration::hours(burst as i64);
    for j in 0..len {
      let i = first + j;
      let ts = start + Duration::minutes(2 * j as i64);
      if i % 2 == 0 {
        fx.files.push(file_record(i, ts));
      } else {
        fx.places.push(location_record(i, ts));
      }
    }
  }
}

/// 10 query events at 09:xx spread over three days.
fn load_morning_queries(fx: &Fixture) {
  let mut id = 0;
  for (day, count) in [(0i64, 4i64), (1, 3), (2, 3)] {
    for k in 0..count {
      let ts = monday_9am() + Duration::days(day) + Duration::minutes(10 * k);
      fx.queries.push(query_record(id, ts));
      id += 1;
    }
  }
}

struct DownSource;

#[async_trait]
impl EventSource for DownSource {
  fn source_type(&self) -> SourceType {
    SourceType::Collaboration
  }

  fn name(&self) -> &str {
    "shared-drive"
  }

  async fn fetch(&self, _: Option<DateTime<Utc>>, _: usize) -> Result<Vec<RawRecord>, EngineError> {
    Err(EngineError::source_fetch("shared-drive", "503 service unavailable"))
  }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bursts_yield_sequential_pattern_and_correlation_per_burst() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);

  let report = fx.engine.run_cycle_at(monday_9am() + Duration::hours(3)).await;
  assert_eq!(report.new_events, 25);

  let sequential: Vec<_> = fx
    .engine
    .patterns()
    .iter()
    .filter(|p| matches!(p.kind, PatternKind::Sequential { .. }))
    .collect();
  assert!(!sequential.is_empty());
  for p in &sequential {
    assert_eq!(p.source_types, vec![SourceType::FileActivity, SourceType::Location]);
    assert!(p.observation_count >= 2);
  }

  let correlations = fx.engine.correlations();
  assert_eq!(correlations.len(), 3, "one correlation per burst");
  for c in correlations {
    assert_eq!(c.source_types, vec![SourceType::FileActivity, SourceType::Location]);
    assert!(c.confidence >= 0.6 && c.confidence <= 1.0);
  }
  assert_eq!(fx.engine.locations()["52.520,13.405"].label.as_deref(), Some("Office"));
}

#[tokio::test]
async fn morning_queries_yield_hour_pattern() {
  let mut fx = make_fixture(Config::default());
  load_morning_queries(&fx);
  let now = monday_9am() + Duration::days(2) + Duration::minutes(40);

  fx.engine.run_cycle_at(now).await;

  let hour9 = fx
    .engine
    .patterns()
    .iter()
    .find(|p| {
      p.kind
        == PatternKind::Temporal {
          temporal_constraint: TemporalConstraint::Hour(9),
        }
    })
    .expect("hour pattern");
  assert_eq!(hour9.source_types, vec![SourceType::QueryLog]);
  assert!(hour9.confidence > 0.6);
  let kind = serde_json::to_value(&hour9.kind).unwrap();
  assert_eq!(kind["temporal_constraint"], json!({"hour": 9}));

  // It is 09:40 now, so the routine applies; an hour-long suggestion.
  let routine: Vec<_> = fx
    .engine
    .get_suggestions_at(10, now)
    .into_iter()
    .filter(|s| s.suggestion_type == SuggestionType::Routine)
    .collect();
  assert!(routine.iter().any(|s| s.context == vec![hour9.id.clone()]));
  assert!(fx
    .engine
    .get_suggestions_at(10, now + Duration::hours(2))
    .iter()
    .all(|s| s.suggestion_type != SuggestionType::Routine));
}

#[tokio::test]
async fn negative_feedback_removes_suggestion_and_raises_threshold() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);
  fx.engine.run_cycle_at(now).await;

  let target = fx.engine.get_suggestions_at(10, now)[0].clone();
  let before = fx.engine.threshold(target.suggestion_type);

  assert_eq!(fx.engine.record_feedback_at(&target.id, -1.0, now), FeedbackOutcome::Rejected);

  let after = fx.engine.get_suggestions_at(10, now);
  assert!(after.iter().all(|s| s.id != target.id));
  let expected = (before + 0.05).min(0.9);
  assert!((fx.engine.threshold(target.suggestion_type) - expected).abs() < 1e-9);

  let report = fx.engine.feedback_report();
  let row = report.iter().find(|r| r.suggestion_type == target.suggestion_type).unwrap();
  assert_eq!(row.rejected, 1);
  assert_eq!(row.accepted, 0);

  // A dismissed suggestion is not brought back by the next cycle.
  fx.engine.run_cycle_at(now + Duration::minutes(1)).await;
  assert!(fx
    .engine
    .get_suggestions_at(10, now + Duration::minutes(1))
    .iter()
    .all(|s| s.provenance_key() != target.provenance_key()));
}

#[tokio::test]
async fn repeated_cycles_reinforce_one_pattern() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);

  fx.engine.run_cycle_at(now).await;
  let first: Vec<_> = fx
    .engine
    .patterns()
    .iter()
    .filter(|p| matches!(p.kind, PatternKind::Sequential { .. }))
    .cloned()
    .collect();

  fx.engine.run_cycle_at(now + Duration::minutes(5)).await;
  let second: Vec<_> = fx
    .engine
    .patterns()
    .iter()
    .filter(|p| matches!(p.kind, PatternKind::Sequential { .. }))
    .cloned()
    .collect();

  assert_eq!(first.len(), second.len(), "no duplicate patterns");
  for (a, b) in first.iter().zip(&second) {
    assert_eq!(a.id, b.id);
    assert_eq!(b.observation_count, a.observation_count + 1);
    assert!(b.confidence >= a.confidence);
    assert!(b.last_observed > a.last_observed);
  }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn collect_without_new_data_is_idempotent() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);

  assert_eq!(fx.engine.collect(100).await, 25);
  let marks = fx.engine.watermarks().clone();
  assert_eq!(fx.engine.collect(100).await, 0);
  assert_eq!(fx.engine.watermarks(), &marks);
  assert_eq!(fx.engine.source_stats()["file_activity"].count, 13);
  assert_eq!(fx.engine.source_stats()["location"].count, 12);
}

#[tokio::test]
async fn timeline_is_chronological() {
  let mut fx = make_fixture(Config::default());
  // Pushed out of order across sources.
  load_morning_queries(&fx);
  load_bursts(&fx);
  fx.engine.collect(100).await;
  fx.engine.rebuild_timeline();

  let timeline = fx.engine.timeline();
  assert_eq!(timeline.len(), 35);
  for pair in timeline.windows(2) {
    assert!(pair[0].timestamp <= pair[1].timestamp);
  }
}

#[tokio::test]
async fn confidences_stay_bounded_across_many_cycles() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  load_morning_queries(&fx);
  let now = monday_9am() + Duration::days(3);

  for i in 0..12 {
    fx.engine.run_cycle_at(now + Duration::minutes(i)).await;
  }
  assert!(!fx.engine.patterns().is_empty());
  for p in fx.engine.patterns() {
    assert!((0.0..=0.95).contains(&p.confidence), "{} out of range", p.id);
  }
  for c in fx.engine.correlations() {
    let distinct: BTreeSet<_> = c.source_types.iter().collect();
    assert!(distinct.len() >= 2);
  }
}

#[tokio::test]
async fn suggestions_respect_thresholds_and_expiry() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  load_morning_queries(&fx);
  let now = monday_9am() + Duration::days(2) + Duration::minutes(45);
  fx.engine.run_cycle_at(now).await;

  let suggestions = fx.engine.get_suggestions_at(50, now);
  assert!(!suggestions.is_empty());
  for s in &suggestions {
    assert!(s.confidence >= Config::default().suggestion_thresholds().unwrap()[&s.suggestion_type]);
    assert!(s.expires_at >= now);
  }
  for pair in suggestions.windows(2) {
    assert!(pair[0].priority.rank() >= pair[1].priority.rank());
  }

  let later = now + Duration::days(8);
  assert!(fx.engine.get_suggestions_at(50, later).is_empty());
}

#[tokio::test]
async fn positive_feedback_lowers_threshold_to_floor() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);
  fx.engine.run_cycle_at(now).await;

  let target = fx.engine.get_suggestions_at(10, now)[0].clone();
  let before = fx.engine.threshold(target.suggestion_type);
  assert_eq!(fx.engine.record_feedback_at(&target.id, 0.8, now), FeedbackOutcome::Accepted);
  let expected = (before - 0.05).max(0.5);
  assert!((fx.engine.threshold(target.suggestion_type) - expected).abs() < 1e-9);

  // Already closed; a second signal finds nothing.
  assert_eq!(fx.engine.record_feedback_at(&target.id, 1.0, now), FeedbackOutcome::NotFound);
  assert_eq!(fx.engine.record_feedback_at("sug-missing", 1.0, now), FeedbackOutcome::NotFound);
}

// ---------------------------------------------------------------------------
// Failure handling and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_source_does_not_block_the_cycle() {
  let mut fx = make_fixture(Config::default());
  fx.engine.add_source(Arc::new(DownSource));
  load_bursts(&fx);

  let report = fx.engine.run_cycle_at(monday_9am() + Duration::hours(3)).await;
  assert_eq!(report.failed_sources, vec!["shared-drive".to_string()]);
  assert_eq!(report.new_events, 25);
  assert!(report.suggestions_created > 0);
}

#[tokio::test]
async fn feedback_from_another_task() {
  let mut fx = make_fixture(Config::default());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);
  fx.engine.run_cycle_at(now).await;

  let target = fx.engine.get_suggestions_at(10, now)[0].clone();
  let handle = fx.engine.feedback_handle();
  let id = target.id.clone();
  let outcome = tokio::spawn(async move { handle.record_feedback_at(&id, -1.0, now) })
    .await
    .unwrap();

  assert_eq!(outcome, FeedbackOutcome::Rejected);
  assert!(fx.engine.get_suggestions_at(10, now).iter().all(|s| s.id != target.id));
}

#[tokio::test]
async fn insights_and_restart_from_snapshot() {
  let sink = Arc::new(MemorySink::new());
  let mut fx = make_fixture(Config::default());
  fx.engine = fx.engine.with_insight_sink(sink.clone());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);
  let report = fx.engine.run_cycle_at(now).await;

  assert_eq!(report.insights_exported, sink.insights().len());
  assert!(sink.insights().iter().all(|i| i.confidence >= 0.65));

  let json = fx.engine.snapshot().to_json().unwrap();
  let snapshot = EngineSnapshot::from_json(&json).unwrap();
  let mut restored = Engine::restore(Config::default(), snapshot).unwrap();
  restored.add_source(fx.files.clone());
  restored.add_source(fx.places.clone());

  // Watermarks survive; nothing is re-ingested.
  assert_eq!(restored.collect(100).await, 0);
  assert_eq!(restored.patterns().len(), fx.engine.patterns().len());
  assert_eq!(restored.correlations().len(), 3);
}

#[tokio::test]
async fn burst_arriving_over_two_cycles_stays_one_correlation() {
  let mut fx = make_fixture(Config::default());
  let push = |fx: &Fixture, range: std::ops::Range<usize>| {
    for i in range {
      let ts = monday_9am() + Duration::minutes(2 * i as i64);
      if i % 2 == 0 {
        fx.files.push(file_record(i, ts));
      } else {
        fx.places.push(location_record(i, ts));
      }
    }
  };

  push(&fx, 0..4);
  let first = fx.engine.run_cycle_at(monday_9am() + Duration::minutes(7)).await;
  assert_eq!(first.correlations_created, 1);
  let id = fx.engine.correlations()[0].id.clone();

  push(&fx, 4..8);
  let now = monday_9am() + Duration::minutes(15);
  let second = fx.engine.run_cycle_at(now).await;
  assert_eq!(second.correlations_created, 0);
  assert_eq!(second.correlations_extended, 1);

  let correlations = fx.engine.correlations();
  assert_eq!(correlations.len(), 1);
  assert_eq!(correlations[0].id, id);
  assert_eq!(correlations[0].source_event_ids.len(), 8);
  assert_eq!(correlations[0].window_span_seconds, 14 * 60);

  let from_correlations = fx
    .engine
    .get_suggestions_at(20, now)
    .iter()
    .filter(|s| s.context.iter().any(|c| c.starts_with("cor-")))
    .count();
  assert_eq!(from_correlations, 1);
}

#[tokio::test]
async fn insights_are_exported_once_per_record() {
  let sink = Arc::new(MemorySink::new());
  let mut fx = make_fixture(Config::default());
  fx.engine = fx.engine.with_insight_sink(sink.clone());
  load_bursts(&fx);
  let now = monday_9am() + Duration::hours(3);

  fx.engine.run_cycle_at(now).await;
  let correlation_insights = |sink: &MemorySink| {
    sink
      .insights()
      .iter()
      .filter(|i| i.category == pattern_engine::insight::CATEGORY_CORRELATION)
      .count()
  };
  let after_first = correlation_insights(&sink);

  for k in 1..4 {
    fx.engine.run_cycle_at(now + Duration::minutes(k)).await;
  }
  assert_eq!(correlation_insights(&sink), after_first);

  let texts: Vec<String> = sink
    .insights()
    .iter()
    .filter(|i| i.category == pattern_engine::insight::CATEGORY_PATTERN)
    .map(|i| i.text.clone())
    .collect();
  let unique: BTreeSet<&String> = texts.iter().collect();
  assert_eq!(unique.len(), texts.len());
}

#[test]
fn config_from_json_rejects_unknown_suggestion_type() {
  let err = Config::from_json_str(r#"{"thresholds": {"routine": 0.7, "hunch": 0.5}}"#).unwrap_err();
  assert!(matches!(err, EngineError::Configuration { .. }));

  let config = Config::from_json_str(r#"{"thresholds": {"routine": 0.7}, "time_window_minutes": 10}"#).unwrap();
  let engine = Engine::new(config).unwrap();
  assert!((engine.threshold(SuggestionType::Routine) - 0.7).abs() < 1e-9);
  assert!((engine.threshold(SuggestionType::Workflow) - 0.65).abs() < 1e-9);
}
