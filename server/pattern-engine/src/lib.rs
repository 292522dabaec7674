//! Pattern Engine: cross-source activity mining with a feedback loop.
//!
//! Collects timestamped records from heterogeneous sources (file activity,
//! collaboration shares, location, ambient sensors, query logs), mines
//! recurring sequential/temporal/spatial patterns, scores cross-source
//! co-occurrences, and emits ranked, expiring suggestions whose per-type
//! thresholds adapt to accept/reject feedback.
//!
//! Single process, in-memory state; sources are injected behind `EventSource`.

pub mod collector;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod fingerprint;
pub mod insight;
pub mod normalize;
pub mod patterns;
pub mod snapshot;
pub mod state;
pub mod stats;
pub mod suggest;
pub mod timeline;
pub mod types;

pub use collector::{EventSource, MemorySource};
pub use config::Config;
pub use engine::{CycleReport, Engine};
pub use error::EngineError;
pub use feedback::{FeedbackHandle, FeedbackOutcome};
pub use snapshot::EngineSnapshot;
pub use types::{Correlation, Event, Pattern, RawRecord, SourceType, Suggestion, SuggestionType};
