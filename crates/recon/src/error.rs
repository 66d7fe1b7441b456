use thiserror::Error;

/// Controlled-vocabulary and provenance lookups that can come back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKind {
    Database,
    Qualifier,
    EvidenceType,
    Topic,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Qualifier => write!(f, "qualifier"),
            Self::EvidenceType => write!(f, "evidence type"),
            Self::Topic => write!(f, "annotation topic"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (empty qualifier, zero chunk size, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// Missing controlled-vocabulary term. Aborts the affected candidate only.
    #[error("{kind} not found: {id}")]
    LookupNotFound { kind: LookupKind, id: String },

    /// Candidate data that cannot be turned into a usable record.
    /// Aborts the affected candidate only.
    #[error("malformed input for '{id}': {reason}")]
    MalformedInput { id: String, reason: String },

    /// Missing required column in an input file.
    #[error("{file}: missing column '{column}'")]
    MissingColumn { file: String, column: String },

    /// Store, network or resolver unavailability. Retried.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// The identifier mapping service refused the request itself. Retrying
    /// will not help and no single candidate is at fault.
    #[error("resolver rejected request: {0}")]
    ResolverRejected(String),

    /// Retries exhausted inside a chunk; halts the batch.
    #[error("chunk starting at candidate {offset} failed after {attempts} attempt(s): {source}")]
    ChunkFailed {
        offset: usize,
        attempts: u32,
        #[source]
        source: Box<ReconError>,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput { id: id.into(), reason: reason.into() }
    }

    pub fn not_found(kind: LookupKind, id: impl Into<String>) -> Self {
        Self::LookupNotFound { kind, id: id.into() }
    }

    /// Transient failures worth repeating with the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// Failures confined to one candidate: record, skip, keep going.
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::LookupNotFound { .. } | Self::MalformedInput { .. })
    }
}
