//! Pairwise covariation matrices for curated complexes.
//!
//! Scores come from a sparse store of protein pairs. The store is indexed by
//! unordered pair so each lookup is O(1); loading can be restricted to the
//! proteins of interest to keep large score files manageable.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::ReconError;

/// Unordered protein pair: `(a, b)` and `(b, a)` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(String, String);

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovariationEntry {
    pub protein_a: String,
    pub protein_b: String,
    pub probability: f64,
}

/// Anything that can score a protein pair.
pub trait ScoreLookup {
    fn score(&self, a: &str, b: &str) -> Option<f64>;
}

impl<F> ScoreLookup for F
where
    F: Fn(&str, &str) -> Option<f64>,
{
    fn score(&self, a: &str, b: &str) -> Option<f64> {
        self(a, b)
    }
}

/// At most one score per unordered pair; the first one loaded wins.
#[derive(Debug, Default)]
pub struct CovariationStore {
    scores: HashMap<PairKey, f64>,
    duplicates: usize,
}

impl CovariationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the pair was already present.
    pub fn insert(&mut self, entry: CovariationEntry) -> bool {
        let key = PairKey::new(&entry.protein_a, &entry.protein_b);
        if self.scores.contains_key(&key) {
            self.duplicates += 1;
            return false;
        }
        self.scores.insert(key, entry.probability);
        true
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl ScoreLookup for CovariationStore {
    fn score(&self, a: &str, b: &str) -> Option<f64> {
        self.scores.get(&PairKey::new(a, b)).copied()
    }
}

// ---------------------------------------------------------------------------
// Matrix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexCovariation {
    /// Sorted, deduplicated. Row/column order of `matrix`.
    pub protein_ids: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
    /// Scored pairs over all off-diagonal pairs. `None` below two proteins.
    pub coverage: Option<f64>,
    pub pairs_with_score: usize,
    pub total_pairs: usize,
}

impl ComplexCovariation {
    pub fn index_of(&self, protein: &str) -> Option<usize> {
        self.protein_ids.binary_search_by(|p| p.as_str().cmp(protein)).ok()
    }
}

/// Build the symmetric covariation matrix of a protein set.
///
/// One lookup per unordered pair, filled row by row; the lower triangle is
/// copied from rows already built. Missing scores become 0.0 and do not
/// count toward coverage.
pub fn build_covariation<L>(protein_ids: &BTreeSet<String>, lookup: &L) -> ComplexCovariation
where
    L: ScoreLookup + ?Sized,
{
    let ids: Vec<String> = protein_ids.iter().cloned().collect();
    let n = ids.len();
    let mut matrix: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut pairs_with_score = 0usize;
    let mut total_pairs = 0usize;

    for i in 0..n {
        let mut row = Vec::with_capacity(n);
        for previous in matrix.iter().take(i) {
            row.push(previous[i]);
        }
        row.push(1.0);
        for j in (i + 1)..n {
            total_pairs += 1;
            let score = lookup
                .score(&ids[i], &ids[j])
                .or_else(|| lookup.score(&ids[j], &ids[i]));
            match score {
                Some(p) => {
                    pairs_with_score += 1;
                    row.push(p);
                }
                None => row.push(0.0),
            }
        }
        matrix.push(row);
    }

    let coverage = if total_pairs == 0 {
        None
    } else {
        Some(pairs_with_score as f64 / total_pairs as f64)
    };

    ComplexCovariation { protein_ids: ids, matrix, coverage, pairs_with_score, total_pairs }
}

/// Split pairs of a matrix into (with score, without score) for reporting.
pub fn split_pairs(cov: &ComplexCovariation, lookup: &impl ScoreLookup) -> (Vec<CovariationEntry>, Vec<PairKey>) {
    let mut with_score = Vec::new();
    let mut without_score = Vec::new();
    for (i, a) in cov.protein_ids.iter().enumerate() {
        for b in cov.protein_ids.iter().skip(i + 1) {
            match lookup.score(a, b).or_else(|| lookup.score(b, a)) {
                Some(probability) => with_score.push(CovariationEntry {
                    protein_a: a.clone(),
                    protein_b: b.clone(),
                    probability,
                }),
                None => without_score.push(PairKey::new(a, b)),
            }
        }
    }
    (with_score, without_score)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Even split of `total` lines into at most `partitions` contiguous ranges.
/// The first `total % partitions` ranges take one extra line.
pub fn partition_ranges(total: usize, partitions: usize) -> Vec<Range<usize>> {
    let partitions = partitions.max(1).min(total.max(1));
    let base = total / partitions;
    let extra = total % partitions;
    let mut ranges = Vec::with_capacity(partitions);
    let mut start = 0;
    for p in 0..partitions {
        let len = base + usize::from(p < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub delimiter: char,
    pub has_header: bool,
    pub partitions: usize,
}

/// Parse delimited `protein_a, protein_b, score` records into a store.
///
/// Records are read with the csv reader, then split into `partitions`
/// ranges converted in parallel; results are merged in range order so
/// duplicate resolution matches a sequential read. With `keep`, pairs
/// touching proteins outside the set are dropped.
pub fn load_scores(
    data: &str,
    options: &LoadOptions,
    keep: Option<&HashSet<String>>,
) -> Result<CovariationStore, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(options.has_header)
        .delimiter(options.delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;

    let ranges = partition_ranges(records.len(), options.partitions);
    let parsed: Vec<Result<Vec<CovariationEntry>, ReconError>> = ranges
        .into_par_iter()
        .map(|range| {
            let mut out = Vec::with_capacity(range.len());
            for record in &records[range] {
                let entry = parse_record(record)?;
                let wanted = keep.map_or(true, |k| {
                    k.contains(&entry.protein_a) && k.contains(&entry.protein_b)
                });
                if wanted {
                    out.push(entry);
                }
            }
            Ok(out)
        })
        .collect();

    let mut store = CovariationStore::new();
    for part in parsed {
        for entry in part? {
            store.insert(entry);
        }
    }
    if store.duplicates() > 0 {
        log::warn!("ignored {} duplicate covariation pair(s)", store.duplicates());
    }
    log::info!("loaded {} covariation pair(s)", store.len());
    Ok(store)
}

fn parse_record(record: &csv::StringRecord) -> Result<CovariationEntry, ReconError> {
    let line = format!("line {}", record.position().map_or(0, |p| p.line()));
    let (Some(a), Some(b), Some(score)) = (record.get(0), record.get(1), record.get(2)) else {
        return Err(ReconError::malformed(line, "expected protein_a, protein_b, score"));
    };
    if a.is_empty() || b.is_empty() {
        return Err(ReconError::malformed(line, "empty protein id"));
    }
    let probability: f64 = score
        .parse()
        .map_err(|_| ReconError::malformed(line, format!("cannot parse score '{score}'")))?;
    Ok(CovariationEntry { protein_a: a.to_string(), protein_b: b.to_string(), probability })
}
