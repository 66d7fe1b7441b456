//! `complexrecon`: candidate complex merging, matching and cross-reference
//! reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded candidates and a queryable
//! registry, returns classified results and xref plans. No CLI or network
//! dependencies; identifier resolution is a trait the caller implements.

pub mod config;
pub mod covariation;
pub mod error;
pub mod input;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod resolver;

pub use config::{ReconConfig, SourcePolicy};
pub use error::ReconError;
pub use matcher::{match_candidate, ComplexRegistry};
pub use merge::merge_candidates;
pub use model::{CandidateComplex, ComplexPlan, CuratedComplex, MatchResult, MatchType};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineSummary};
pub use reconcile::Reconciler;
pub use registry::{InMemoryRegistry, PlanSink};
