use std::collections::{BTreeSet, HashSet};

use crate::error::ReconError;
use crate::model::{CandidateComplex, CuratedComplex, MatchResult, MatchType, MatchedComplex, SimilarityMetrics};

/// Read-only view of the curated registry, queryable by member accession.
///
/// Implementations are shared across worker threads. Connectivity failures
/// should surface as [`ReconError::Infrastructure`] so callers can retry.
pub trait ComplexRegistry: Sync {
    fn complexes_containing(&self, accession: &str) -> Result<Vec<CuratedComplex>, ReconError>;
}

/// Jaccard index of two sets. Two empty sets are identical.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let common = a.intersection(b).count();
    let union = a.len() + b.len() - common;
    if union == 0 {
        return 1.0;
    }
    common as f64 / union as f64
}

pub fn similarity_metrics(
    candidate: &BTreeSet<String>,
    curated: &BTreeSet<String>,
) -> SimilarityMetrics {
    let common = candidate.intersection(curated).count();
    let extra = curated.len() - common;
    let missing = candidate.len() - common;
    let total = common + extra + missing;
    SimilarityMetrics {
        proteins_in_common: common,
        extra_in_complex: extra,
        missing_in_complex: missing,
        similarity: if total == 0 { 1.0 } else { common as f64 / total as f64 },
    }
}

/// Classify a candidate against the registry. Never mutates the registry.
///
/// Partial matches are ranked by similarity (descending), ties broken by
/// ascending accession.
pub fn match_candidate<R>(candidate: &CandidateComplex, registry: &R) -> Result<MatchResult, ReconError>
where
    R: ComplexRegistry + ?Sized,
{
    let overlapping = overlapping_complexes(candidate, registry)?;
    if overlapping.is_empty() {
        return Ok(MatchResult::no_match());
    }

    let scored: Vec<MatchedComplex> = overlapping
        .into_iter()
        .map(|complex| {
            let metrics = similarity_metrics(&candidate.member_accessions, &complex.member_accessions);
            MatchedComplex { complex, metrics }
        })
        .collect();

    let exact: Vec<MatchedComplex> = scored.iter().filter(|m| m.metrics.is_exact()).cloned().collect();
    match exact.len() {
        0 => {}
        1 => {
            return Ok(MatchResult { match_type: MatchType::ExactMatch, matched: exact });
        }
        _ => {
            return Ok(MatchResult { match_type: MatchType::MultipleExactMatches, matched: exact });
        }
    }

    let mut partial = scored;
    partial.sort_by(|a, b| {
        b.metrics
            .similarity
            .total_cmp(&a.metrics.similarity)
            .then_with(|| a.complex.accession.cmp(&b.complex.accession))
    });

    Ok(MatchResult { match_type: MatchType::PartialMatch, matched: partial })
}

/// Every curated complex sharing at least one member, in discovery order.
fn overlapping_complexes<R>(
    candidate: &CandidateComplex,
    registry: &R,
) -> Result<Vec<CuratedComplex>, ReconError>
where
    R: ComplexRegistry + ?Sized,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Vec::new();
    for accession in &candidate.member_accessions {
        for complex in registry.complexes_containing(accession)? {
            if seen.insert(complex.accession.clone()) {
                found.push(complex);
            }
        }
    }
    Ok(found)
}
