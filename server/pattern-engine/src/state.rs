//! The analysis state aggregate: everything one engine instance owns.

use std::collections::BTreeMap;

use crate::correlation::CorrelationStore;
use crate::patterns::PatternStore;
use crate::stats::SourceStats;
use crate::timeline::{EventStore, Timeline};
use crate::types::{Event, LocationContext};

#[derive(Debug, Default)]
pub struct AnalysisState {
  pub events: EventStore,
  pub timeline: Timeline,
  pub patterns: PatternStore,
  pub correlations: CorrelationStore,
  pub locations: BTreeMap<String, LocationContext>,
  /// Keyed by source name.
  pub source_stats: BTreeMap<String, SourceStats>,
}

impl AnalysisState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn rebuild_timeline(&mut self) {
    self.timeline = Timeline::rebuild(&self.events);
  }

  /// Fold a location event into its place's visit history.
  pub fn record_visit(&mut self, event: &Event) {
    let Some(location_id) = event.location_id() else {
      return;
    };
    let (lat, lon) = coordinates(event).unwrap_or((0.0, 0.0));
    let label = event
      .attributes
      .get("label")
      .and_then(|v| v.as_str())
      .map(str::to_string);

    let ctx = self
      .locations
      .entry(location_id.to_string())
      .or_insert_with(|| LocationContext {
        location_id: location_id.to_string(),
        latitude: lat,
        longitude: lon,
        label: None,
        visit_count: 0,
        first_visit: event.timestamp,
        last_visit: event.timestamp,
      });
    ctx.visit_count += 1;
    if event.timestamp < ctx.first_visit {
      ctx.first_visit = event.timestamp;
    }
    if event.timestamp > ctx.last_visit {
      ctx.last_visit = event.timestamp;
    }
    if ctx.label.is_none() {
      ctx.label = label;
    }
  }
}

fn coordinates(event: &Event) -> Option<(f64, f64)> {
  let pair = event.attributes.get("coordinates")?.as_array()?;
  Some((pair.first()?.as_f64()?, pair.get(1)?.as_f64()?))
}
