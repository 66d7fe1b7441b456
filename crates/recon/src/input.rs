//! CSV loaders for candidates and registry exports.
//!
//! All loaders take the file contents as a string; reading files is the
//! caller's job. Multi-valued fields (ids, proteins) are space-separated.

use std::collections::HashMap;

use crate::error::ReconError;
use crate::model::{Annotation, CandidateComplex, ComplexType, CuratedComplex, Xref};

struct Table {
    file: String,
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    fn read(file: &str, data: &str, delimiter: char) -> Result<Self, ReconError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter as u8)
            .trim(csv::Trim::All)
            .from_reader(data.as_bytes());
        let headers = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self { file: file.to_string(), headers, records })
    }

    fn idx(&self, column: &str) -> Result<usize, ReconError> {
        self.headers.iter().position(|h| h == column).ok_or_else(|| ReconError::MissingColumn {
            file: self.file.clone(),
            column: column.into(),
        })
    }

    fn optional_idx(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> &'a str {
    record.get(idx).unwrap_or("")
}

fn optional_field<'a>(record: &'a csv::StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.map(|i| field(record, i)).filter(|v| !v.is_empty())
}

fn split_space(value: &str) -> impl Iterator<Item = &str> {
    value.split_whitespace()
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A candidate row that could not become a valid candidate.
#[derive(Debug)]
pub struct RejectedRow {
    /// 1-based line number, header included.
    pub line: usize,
    /// Raw `ids` field, or `row <line>` when it is empty.
    pub ids: String,
    pub error: ReconError,
}

/// Valid candidates plus the rows that were skipped.
#[derive(Debug, Default)]
pub struct CandidateLoad {
    pub candidates: Vec<CandidateComplex>,
    pub rejected: Vec<RejectedRow>,
}

impl From<Vec<CandidateComplex>> for CandidateLoad {
    fn from(candidates: Vec<CandidateComplex>) -> Self {
        Self { candidates, rejected: Vec::new() }
    }
}

/// Load candidates. Required columns: `ids`, `proteins`. Optional:
/// `confidence`, `name`.
///
/// Missing columns and unreadable CSV fail the load. A row that cannot
/// become a valid candidate is rejected on its own and the rest load.
pub fn load_candidates(data: &str, delimiter: char) -> Result<CandidateLoad, ReconError> {
    let table = Table::read("candidates", data, delimiter)?;
    let ids_idx = table.idx("ids")?;
    let proteins_idx = table.idx("proteins")?;
    let confidence_idx = table.optional_idx("confidence");
    let name_idx = table.optional_idx("name");

    let mut load = CandidateLoad { candidates: Vec::with_capacity(table.records.len()), rejected: Vec::new() };
    for (row, record) in table.records.iter().enumerate() {
        let line = record.position().map_or(row + 2, |p| p.line() as usize);
        let ids = field(record, ids_idx);
        let row_id = if ids.is_empty() { format!("row {line}") } else { ids.to_string() };

        match candidate_from_row(record, &row_id, ids, proteins_idx, confidence_idx, name_idx) {
            Ok(candidate) => load.candidates.push(candidate),
            Err(error) => {
                log::warn!("candidate line {line} rejected: {error}");
                load.rejected.push(RejectedRow { line, ids: row_id, error });
            }
        }
    }

    log::info!("loaded {} candidate(s), {} rejected", load.candidates.len(), load.rejected.len());
    Ok(load)
}

fn candidate_from_row(
    record: &csv::StringRecord,
    row_id: &str,
    ids: &str,
    proteins_idx: usize,
    confidence_idx: Option<usize>,
    name_idx: Option<usize>,
) -> Result<CandidateComplex, ReconError> {
    let mut candidate = CandidateComplex::new(split_space(ids), split_space(field(record, proteins_idx)));
    if let Some(raw) = optional_field(record, confidence_idx) {
        let confidence: f64 = raw
            .parse()
            .map_err(|_| ReconError::malformed(row_id, format!("invalid confidence '{raw}'")))?;
        candidate = candidate.with_confidence(confidence);
    }
    if let Some(name) = optional_field(record, name_idx) {
        candidate = candidate.with_name(name);
    }
    candidate.validate().map_err(|e| match e {
        ReconError::MalformedInput { reason, .. } => ReconError::malformed(row_id, reason),
        other => other,
    })?;
    Ok(candidate)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Load curated complexes. Required columns: `complex_ac`, `proteins`.
/// Optional: `predicted` (`true`/`false`), `complex_type`.
pub fn load_complexes(data: &str, delimiter: char) -> Result<Vec<CuratedComplex>, ReconError> {
    let table = Table::read("complexes", data, delimiter)?;
    let ac_idx = table.idx("complex_ac")?;
    let proteins_idx = table.idx("proteins")?;
    let predicted_idx = table.optional_idx("predicted");
    let type_idx = table.optional_idx("complex_type");

    let mut complexes = Vec::with_capacity(table.records.len());
    for record in &table.records {
        let ac = field(record, ac_idx);
        if ac.is_empty() {
            return Err(ReconError::malformed("complexes", "row without complex_ac"));
        }
        let mut complex = CuratedComplex::new(ac, split_space(field(record, proteins_idx)));
        if let Some(raw) = optional_field(record, predicted_idx) {
            complex.is_predicted = match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => return Err(ReconError::malformed(ac, format!("invalid predicted flag '{raw}'"))),
            };
        }
        if let Some(raw) = optional_field(record, type_idx) {
            complex.complex_type = raw.parse::<ComplexType>().map_err(|e| ReconError::malformed(ac, e))?;
        }
        complexes.push(complex);
    }
    Ok(complexes)
}

/// Attach xrefs (`complex_ac`, `database`, `qualifier`, `identifier`) to
/// loaded complexes. Rows for unknown complexes are skipped with a warning.
pub fn attach_xrefs(complexes: &mut [CuratedComplex], data: &str, delimiter: char) -> Result<usize, ReconError> {
    let table = Table::read("xrefs", data, delimiter)?;
    let ac_idx = table.idx("complex_ac")?;
    let db_idx = table.idx("database")?;
    let qual_idx = table.idx("qualifier")?;
    let id_idx = table.idx("identifier")?;

    let by_ac: HashMap<String, usize> =
        complexes.iter().enumerate().map(|(i, c)| (c.accession.clone(), i)).collect();

    let mut attached = 0;
    for record in &table.records {
        let ac = field(record, ac_idx);
        let Some(&i) = by_ac.get(ac) else {
            log::warn!("xref for unknown complex {ac} skipped");
            continue;
        };
        complexes[i].xrefs.push(Xref {
            database: field(record, db_idx).to_string(),
            qualifier: field(record, qual_idx).to_string(),
            identifier: field(record, id_idx).to_string(),
        });
        attached += 1;
    }
    Ok(attached)
}

/// Attach annotations (`complex_ac`, `topic`, `text`) to loaded complexes.
pub fn attach_annotations(
    complexes: &mut [CuratedComplex],
    data: &str,
    delimiter: char,
) -> Result<usize, ReconError> {
    let table = Table::read("annotations", data, delimiter)?;
    let ac_idx = table.idx("complex_ac")?;
    let topic_idx = table.idx("topic")?;
    let text_idx = table.idx("text")?;

    let by_ac: HashMap<String, usize> =
        complexes.iter().enumerate().map(|(i, c)| (c.accession.clone(), i)).collect();

    let mut attached = 0;
    for record in &table.records {
        let ac = field(record, ac_idx);
        let Some(&i) = by_ac.get(ac) else {
            log::warn!("annotation for unknown complex {ac} skipped");
            continue;
        };
        complexes[i].annotations.push(Annotation {
            topic: field(record, topic_idx).to_string(),
            text: field(record, text_idx).to_string(),
        });
        attached += 1;
    }
    Ok(attached)
}
