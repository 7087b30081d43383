//! Event tracking for the caseflow platform.
//!
//! [`Analytics`] is the contract used by support workflows. Two
//! implementations are provided: [`RecordingAnalytics`] keeps events in
//! memory, [`TracingAnalytics`] writes them to the log.

pub mod error;
pub mod tracker;

pub use error::AnalyticsError;
pub use tracker::{Analytics, RecordingAnalytics, TrackedEvent, TracingAnalytics};
