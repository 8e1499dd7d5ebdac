//! Pipeline orchestration for PaperScout.
//!
//! This crate ties discovery, enrichment, acquisition, and storage into
//! end-to-end runs ([`run_discovery`]) and hosts the quality gate that
//! decides when stored results justify another acquisition pass
//! ([`assess_and_acquire`]).

pub mod fallback;
pub mod pipeline;
pub mod quality;

pub use fallback::{Assessment, assess_and_acquire};
pub use pipeline::{PipelineContext, ProgressReporter, SilentProgress, run_discovery};
pub use quality::{Evidence, FallbackDecision, FallbackReason, QualityGate, QualityMetrics};
