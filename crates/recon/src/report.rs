//! CSV audit trail. One file per concern, same shapes across sources.
//!
//! Each [`ReportWriter`] owns its `csv::Writer` behind a mutex, so a
//! [`ReportSet`] can be shared by worker threads without interleaving rows.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::config::{ConfidenceFormat, ReportConfig};
use crate::covariation::{CovariationEntry, PairKey};
use crate::error::ReconError;
use crate::model::{join_space, CandidateComplex, ComplexPlan, MatchResult, MatchType, XrefAction};

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub delimiter: u8,
    pub header: bool,
    pub include_confidence: bool,
    pub confidence_format: ConfidenceFormat,
    /// Append to existing files instead of truncating them. The header is
    /// only written to files that are new or empty.
    pub append: bool,
}

impl ReportOptions {
    pub fn from_config(config: &ReportConfig, confidence_format: ConfidenceFormat) -> Self {
        Self {
            delimiter: config.delimiter as u8,
            header: config.header,
            include_confidence: config.include_confidence,
            confidence_format,
            append: false,
        }
    }

    fn confidence(&self, value: Option<f64>) -> String {
        value.map(|v| self.confidence_format.format(v)).unwrap_or_default()
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
            include_confidence: true,
            confidence_format: ConfidenceFormat::default(),
            append: false,
        }
    }
}

/// A single report file.
pub struct ReportWriter {
    inner: Mutex<csv::Writer<Box<dyn Write + Send>>>,
}

impl ReportWriter {
    pub fn new(sink: Box<dyn Write + Send>, columns: &[&str], options: &ReportOptions) -> Result<Self, ReconError> {
        Self::with_header(sink, columns, options, options.header)
    }

    fn with_header(
        sink: Box<dyn Write + Send>,
        columns: &[&str],
        options: &ReportOptions,
        header: bool,
    ) -> Result<Self, ReconError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(sink);
        if header {
            writer.write_record(columns)?;
        }
        Ok(Self { inner: Mutex::new(writer) })
    }

    pub fn create(path: &Path, columns: &[&str], options: &ReportOptions) -> Result<Self, ReconError> {
        let (file, fresh) = if options.append {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let fresh = file.metadata()?.len() == 0;
            (file, fresh)
        } else {
            (File::create(path)?, true)
        };
        Self::with_header(Box::new(BufWriter::new(file)), columns, options, options.header && fresh)
    }

    pub fn write_row<I, S>(&self, fields: I) -> Result<(), ReconError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.inner.lock().write_record(fields)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ReconError> {
        self.inner.lock().flush()?;
        Ok(())
    }
}

fn with_confidence<'a>(columns: &[&'a str], options: &ReportOptions) -> Vec<&'a str> {
    let mut out = columns.to_vec();
    if options.include_confidence {
        out.push("confidence");
    }
    out
}

// ---------------------------------------------------------------------------
// Report set
// ---------------------------------------------------------------------------

pub struct ReportSet {
    options: ReportOptions,
    errors: ReportWriter,
    failed: ReportWriter,
    no_match: ReportWriter,
    exact_match: ReportWriter,
    multiple_exact_matches: ReportWriter,
    partial_match: ReportWriter,
    new_complexes: ReportWriter,
    updated_complexes: ReportWriter,
}

const ERRORS: &[&str] = &["ids", "error_message"];
const FAILED: &[&str] = &["id", "participant_acs", "problematic_acs", "reasons"];
const NO_MATCH: &[&str] = &["ids", "proteins"];
const EXACT: &[&str] = &["match_type", "ids", "proteins", "complex_ac", "complex_type"];
const MULTIPLE: &[&str] = &["match_type", "ids", "proteins", "complex_acs", "complex_types"];
const PARTIAL: &[&str] = &[
    "match_type",
    "ids",
    "proteins",
    "complex_ac",
    "complex_type",
    "num_proteins_in_common",
    "num_extra_proteins_in_complex",
    "num_proteins_missing_in_complex",
    "similarity",
];
const WRITE: &[&str] = &["ids", "confidence", "uniprot_acs", "complex_acs", "xref_qualifier"];

impl ReportSet {
    /// Open every report file under `dir`, creating the directory if needed.
    pub fn create(dir: &Path, options: ReportOptions) -> Result<Self, ReconError> {
        std::fs::create_dir_all(dir)?;
        let open = |name: &str, columns: Vec<&str>| ReportWriter::create(&dir.join(name), &columns, &options);
        Ok(Self {
            errors: open("errors.csv", ERRORS.to_vec())?,
            failed: open("failed.csv", FAILED.to_vec())?,
            no_match: open("no_match.csv", with_confidence(NO_MATCH, &options))?,
            exact_match: open("exact_match.csv", with_confidence(EXACT, &options))?,
            multiple_exact_matches: open("multiple_exact_matches.csv", with_confidence(MULTIPLE, &options))?,
            partial_match: open("partial_match.csv", with_confidence(PARTIAL, &options))?,
            new_complexes: open("new_complexes.csv", WRITE.to_vec())?,
            updated_complexes: open("updated_complexes.csv", WRITE.to_vec())?,
            options,
        })
    }

    pub fn error(&self, ids: &str, message: &str) -> Result<(), ReconError> {
        self.errors.write_row([ids, message])
    }

    pub fn failed(
        &self,
        candidate: &CandidateComplex,
        problematic: &[String],
        reasons: &[String],
    ) -> Result<(), ReconError> {
        self.failed.write_row([
            candidate.ids_joined(),
            candidate.members_joined(),
            problematic.join(" "),
            reasons.join(";"),
        ])
    }

    /// One row per matched complex (one row for no match / multiple exact).
    pub fn matched(&self, candidate: &CandidateComplex, result: &MatchResult) -> Result<(), ReconError> {
        let ids = candidate.ids_joined();
        let proteins = candidate.members_joined();
        let confidence = self.options.confidence(candidate.confidence);
        let conf = |mut row: Vec<String>| {
            if self.options.include_confidence {
                row.push(confidence.clone());
            }
            row
        };

        match result.match_type {
            MatchType::NoMatch => self.no_match.write_row(conf(vec![ids, proteins])),
            MatchType::ExactMatch => {
                for m in &result.matched {
                    self.exact_match.write_row(conf(vec![
                        result.match_type.to_string(),
                        ids.clone(),
                        proteins.clone(),
                        m.complex.accession.clone(),
                        m.complex.complex_type.to_string(),
                    ]))?;
                }
                Ok(())
            }
            MatchType::MultipleExactMatches => {
                let acs: Vec<String> = result.complexes().map(|c| c.accession.clone()).collect();
                let types: Vec<String> = result.complexes().map(|c| c.complex_type.to_string()).collect();
                self.multiple_exact_matches.write_row(conf(vec![
                    result.match_type.to_string(),
                    ids,
                    proteins,
                    join_space(&acs),
                    join_space(&types),
                ]))
            }
            MatchType::PartialMatch => {
                for m in &result.matched {
                    self.partial_match.write_row(conf(vec![
                        result.match_type.to_string(),
                        ids.clone(),
                        proteins.clone(),
                        m.complex.accession.clone(),
                        m.complex.complex_type.to_string(),
                        m.metrics.proteins_in_common.to_string(),
                        m.metrics.extra_in_complex.to_string(),
                        m.metrics.missing_in_complex.to_string(),
                        format!("{:.4}", m.metrics.similarity),
                    ]))?;
                }
                Ok(())
            }
        }
    }

    /// Record a plan in the new- or updated-complex report.
    pub fn written(&self, plan: &ComplexPlan) -> Result<(), ReconError> {
        let mut qualifiers: Vec<String> = plan
            .xref_ops
            .iter()
            .filter_map(|op| match &op.action {
                XrefAction::Add { qualifier, .. } => Some(qualifier.clone()),
                XrefAction::Update { new_qualifier, .. } => Some(new_qualifier.clone()),
                XrefAction::Remove { .. } => None,
            })
            .collect();
        qualifiers.sort();
        qualifiers.dedup();

        let row = [
            plan.candidate.ids_joined(),
            self.options.confidence(plan.candidate.confidence),
            plan.candidate.members_joined(),
            plan.complex.to_string(),
            qualifiers.join(" "),
        ];
        if plan.is_new_complex() {
            self.new_complexes.write_row(row)
        } else {
            self.updated_complexes.write_row(row)
        }
    }

    pub fn flush(&self) -> Result<(), ReconError> {
        for w in [
            &self.errors,
            &self.failed,
            &self.no_match,
            &self.exact_match,
            &self.multiple_exact_matches,
            &self.partial_match,
            &self.new_complexes,
            &self.updated_complexes,
        ] {
            w.flush()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Covariation reports
// ---------------------------------------------------------------------------

pub struct CovariationReports {
    with_score: ReportWriter,
    without_score: ReportWriter,
}

impl CovariationReports {
    pub fn create(dir: &Path, options: &ReportOptions) -> Result<Self, ReconError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            with_score: ReportWriter::create(
                &dir.join("covariation_with_score.csv"),
                &["complex_id", "protein_a", "protein_b", "mi_score"],
                options,
            )?,
            without_score: ReportWriter::create(
                &dir.join("covariation_without_score.csv"),
                &["complex_id", "protein_a", "protein_b"],
                options,
            )?,
        })
    }

    pub fn write(
        &self,
        complex_id: &str,
        with_score: &[CovariationEntry],
        without_score: &[PairKey],
    ) -> Result<(), ReconError> {
        for e in with_score {
            self.with_score.write_row([
                complex_id,
                e.protein_a.as_str(),
                e.protein_b.as_str(),
                e.probability.to_string().as_str(),
            ])?;
        }
        for pair in without_score {
            self.without_score.write_row([complex_id, pair.first(), pair.second()])?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), ReconError> {
        self.with_score.flush()?;
        self.without_score.flush()
    }
}
