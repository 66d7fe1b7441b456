use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A complex proposed by an external predictor.
///
/// `ids` holds every source identifier known to denote this candidate; after
/// merging, ids are unique across the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateComplex {
    pub ids: BTreeSet<String>,
    pub member_accessions: BTreeSet<String>,
    pub confidence: Option<f64>,
    pub name: Option<String>,
}

impl CandidateComplex {
    pub fn new<I, M>(ids: I, members: M) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            member_accessions: members.into_iter().map(Into::into).collect(),
            confidence: None,
            name: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Smallest id. Stable handle for logs, reports and ordering.
    pub fn key(&self) -> &str {
        self.ids.iter().next().map(String::as_str).unwrap_or("")
    }

    pub fn ids_joined(&self) -> String {
        join_space(&self.ids)
    }

    pub fn members_joined(&self) -> String {
        join_space(&self.member_accessions)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.ids.is_empty() {
            return Err(ReconError::malformed("<unnamed>", "candidate has no ids"));
        }
        if self.member_accessions.is_empty() {
            return Err(ReconError::malformed(self.key(), "candidate has no member accessions"));
        }
        Ok(())
    }
}

pub(crate) fn join_space<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values.into_iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexType {
    StableComplex,
    TransientComplex,
    MolecularAssembly,
}

impl std::fmt::Display for ComplexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StableComplex => write!(f, "stable_complex"),
            Self::TransientComplex => write!(f, "transient_complex"),
            Self::MolecularAssembly => write!(f, "molecular_assembly"),
        }
    }
}

impl std::str::FromStr for ComplexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stable_complex" | "stable complex" => Ok(Self::StableComplex),
            "transient_complex" | "transient complex" => Ok(Self::TransientComplex),
            "molecular_assembly" | "molecular assembly" => Ok(Self::MolecularAssembly),
            other => Err(format!("unknown complex type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xref {
    pub database: String,
    pub qualifier: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub topic: String,
    pub text: String,
}

/// An entry of the curated registry. Read-only here apart from queued
/// xref and annotation operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedComplex {
    pub accession: String,
    pub member_accessions: BTreeSet<String>,
    pub is_predicted: bool,
    pub complex_type: ComplexType,
    #[serde(default)]
    pub xrefs: Vec<Xref>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl CuratedComplex {
    pub fn new<M>(accession: impl Into<String>, members: M) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            accession: accession.into(),
            member_accessions: members.into_iter().map(Into::into).collect(),
            is_predicted: false,
            complex_type: ComplexType::StableComplex,
            xrefs: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Xrefs to `database` whose identifier is one of `ids`.
    pub fn xrefs_for<'a>(
        &'a self,
        database: &'a str,
        ids: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a Xref> + 'a {
        self.xrefs
            .iter()
            .filter(move |x| x.database == database && ids.contains(&x.identifier))
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    NoMatch,
    ExactMatch,
    MultipleExactMatches,
    PartialMatch,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatch => write!(f, "NO_MATCH"),
            Self::ExactMatch => write!(f, "EXACT_MATCH"),
            Self::MultipleExactMatches => write!(f, "MULTIPLE_EXACT_MATCHES"),
            Self::PartialMatch => write!(f, "PARTIAL_MATCH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityMetrics {
    pub proteins_in_common: usize,
    /// Curated members absent from the candidate.
    pub extra_in_complex: usize,
    /// Candidate members absent from the curated complex.
    pub missing_in_complex: usize,
    pub similarity: f64,
}

impl SimilarityMetrics {
    pub fn is_exact(&self) -> bool {
        self.extra_in_complex == 0 && self.missing_in_complex == 0
    }

    /// Candidate is a strict subset of the curated complex.
    pub fn candidate_is_subset(&self) -> bool {
        self.missing_in_complex == 0 && self.extra_in_complex > 0
    }

    /// Curated complex is contained in the candidate.
    pub fn complex_is_contained(&self) -> bool {
        self.extra_in_complex == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedComplex {
    pub complex: CuratedComplex,
    pub metrics: SimilarityMetrics,
}

/// Classification of one candidate against the registry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub match_type: MatchType,
    /// Exact matches in discovery order, or partial matches ranked best first.
    pub matched: Vec<MatchedComplex>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self { match_type: MatchType::NoMatch, matched: Vec::new() }
    }

    pub fn metrics(&self) -> Option<&SimilarityMetrics> {
        self.matched.first().map(|m| &m.metrics)
    }

    pub fn complexes(&self) -> impl Iterator<Item = &CuratedComplex> {
        self.matched.iter().map(|m| &m.complex)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XrefKind {
    Identity,
    Subset,
    Cluster,
}

impl std::fmt::Display for XrefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Subset => write!(f, "subset"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

/// Target of a queued mutation: an existing registry entry, or the complex
/// that will be created for a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum ComplexRef {
    Existing(String),
    New(String),
}

impl std::fmt::Display for ComplexRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existing(ac) => write!(f, "{ac}"),
            Self::New(key) => write!(f, "new:{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum XrefAction {
    Add { database: String, qualifier: String, identifier: String },
    Update { existing: Xref, new_qualifier: String },
    Remove { existing: Xref },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XrefOperation {
    pub complex: ComplexRef,
    pub kind: XrefKind,
    pub action: XrefAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AnnotationAction {
    Add { topic: String, text: String },
    Update { existing: Annotation, new_text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationOperation {
    pub complex: ComplexRef,
    pub action: AnnotationAction,
}

/// Everything queued for one complex as a consequence of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexPlan {
    pub candidate: CandidateComplex,
    pub match_type: MatchType,
    pub complex: ComplexRef,
    pub xref_ops: Vec<XrefOperation>,
    pub annotation_ops: Vec<AnnotationOperation>,
}

impl ComplexPlan {
    pub fn is_empty(&self) -> bool {
        self.xref_ops.is_empty() && self.annotation_ops.is_empty()
    }

    pub fn is_new_complex(&self) -> bool {
        matches!(self.complex, ComplexRef::New(_))
    }
}
