//! Structured log event identifiers for the turn pipeline.

mod pipeline_events;

pub use pipeline_events::PipelineEvent;
