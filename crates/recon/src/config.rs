use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    pub source: SourcePolicy,
    pub input: InputConfig,
    /// Prefix for accessions of complexes created from unmatched candidates.
    #[serde(default = "default_accession_prefix")]
    pub accession_prefix: String,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub reports: ReportConfig,
    #[serde(default)]
    pub resolver: Option<ResolverConfig>,
    #[serde(default)]
    pub covariation: Option<CovariationConfig>,
    /// Controlled-vocabulary terms known to this run, keyed by term id.
    #[serde(default)]
    pub terms: HashMap<String, String>,
}

fn default_accession_prefix() -> String {
    "CPX-PRED-".into()
}

// ---------------------------------------------------------------------------
// Source policy
// ---------------------------------------------------------------------------

/// Everything that differs between import sources. One reconciliation
/// engine, parameterized by this value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcePolicy {
    pub name: String,
    pub database_id: String,
    pub identity_qualifier: String,
    pub subset_qualifier: String,
    pub cluster_qualifier: String,
    pub evidence_type: String,
    /// Annotation topic carrying the candidate confidence.
    #[serde(default)]
    pub confidence_topic: Option<String>,
    #[serde(default)]
    pub confidence_format: ConfidenceFormat,
}

impl SourcePolicy {
    pub fn qualifier_for(&self, kind: crate::model::XrefKind) -> &str {
        use crate::model::XrefKind;
        match kind {
            XrefKind::Identity => &self.identity_qualifier,
            XrefKind::Subset => &self.subset_qualifier,
            XrefKind::Cluster => &self.cluster_qualifier,
        }
    }

    pub fn kind_for_qualifier(&self, qualifier: &str) -> Option<crate::model::XrefKind> {
        use crate::model::XrefKind;
        [XrefKind::Identity, XrefKind::Subset, XrefKind::Cluster]
            .into_iter()
            .find(|k| self.qualifier_for(*k) == qualifier)
    }
}

/// How a numeric confidence is rendered in reports and annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfidenceFormat {
    Decimal { precision: usize },
    Integer,
}

impl Default for ConfidenceFormat {
    fn default() -> Self {
        Self::Decimal { precision: 3 }
    }
}

impl ConfidenceFormat {
    pub fn format(&self, value: f64) -> String {
        match *self {
            Self::Decimal { precision } => format!("{value:.precision$}"),
            Self::Integer => format!("{}", value.round() as i64),
        }
    }
}

// ---------------------------------------------------------------------------
// Input files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub candidates: String,
    pub complexes: String,
    #[serde(default)]
    pub xrefs: Option<String>,
    #[serde(default)]
    pub annotations: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Checkpoint file. Without it every run starts from the first candidate.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

fn default_chunk_size() -> usize {
    500
}

fn default_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            checkpoint: None,
        }
    }
}

impl PipelineSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub dir: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_true")]
    pub header: bool,
    #[serde(default = "default_true")]
    pub include_confidence: bool,
}

fn default_report_dir() -> String {
    "reports".into()
}

fn default_true() -> bool {
    true
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
            delimiter: default_delimiter(),
            header: true,
            include_confidence: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Identifier resolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_url")]
    pub base_url: String,
    pub from_db: String,
    #[serde(default = "default_to_db")]
    pub to_db: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_resolver_url() -> String {
    "https://rest.uniprot.org".into()
}

fn default_to_db() -> String {
    "UniProtKB".into()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_max_polls() -> u32 {
    120
}

fn default_requests_per_second() -> u32 {
    2
}

impl ResolverConfig {
    pub fn settings(&self) -> crate::resolver::ResolverSettings {
        crate::resolver::ResolverSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
            requests_per_second: self.requests_per_second,
        }
    }
}

// ---------------------------------------------------------------------------
// Covariation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CovariationConfig {
    pub scores: String,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub has_header: bool,
}

fn default_partitions() -> usize {
    8
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let s = &self.source;
        for (field, value) in [
            ("source.database_id", &s.database_id),
            ("source.identity_qualifier", &s.identity_qualifier),
            ("source.subset_qualifier", &s.subset_qualifier),
            ("source.cluster_qualifier", &s.cluster_qualifier),
            ("source.evidence_type", &s.evidence_type),
        ] {
            if value.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!("{field} must not be empty")));
            }
        }

        // Each qualifier must identify exactly one xref kind
        if s.identity_qualifier == s.subset_qualifier
            || s.identity_qualifier == s.cluster_qualifier
            || s.subset_qualifier == s.cluster_qualifier
        {
            return Err(ReconError::ConfigValidation(
                "identity, subset and cluster qualifiers must be distinct".into(),
            ));
        }

        if self.accession_prefix.trim().is_empty() {
            return Err(ReconError::ConfigValidation("accession_prefix must not be empty".into()));
        }

        if self.pipeline.chunk_size == 0 {
            return Err(ReconError::ConfigValidation("pipeline.chunk_size must be at least 1".into()));
        }
        if self.pipeline.workers == 0 {
            return Err(ReconError::ConfigValidation("pipeline.workers must be at least 1".into()));
        }

        if let Some(ref resolver) = self.resolver {
            if resolver.requests_per_second == 0 {
                return Err(ReconError::ConfigValidation(
                    "resolver.requests_per_second must be at least 1".into(),
                ));
            }
        }

        if let Some(ref cov) = self.covariation {
            if cov.partitions == 0 {
                return Err(ReconError::ConfigValidation(
                    "covariation.partitions must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
