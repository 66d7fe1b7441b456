//! Chunked batch driver.
//!
//! ```text
//! merge ─► replay journal ─► skip checkpointed ─► per chunk:
//!     resolve ids (optional, retried)
//!     match + reconcile (parallel, rayon pool)
//!     reports + plan sink (sequential, input order)
//!     journal applied plans
//!     checkpoint
//! ```
//!
//! Per-item failures go to the error/failed reports and the candidate is
//! skipped. Infrastructure failures are retried; once retries run out the
//! chunk fails and the batch stops. The checkpoint only advances after a
//! chunk is fully written and its plans are journaled, so a rerun resumes
//! at the failed chunk.
//!
//! The journal sits next to the checkpoint (`<checkpoint>.plans.jsonl`).
//! A resumed run replays the committed plans into the sink before matching,
//! so a sink that does not persist between runs ends up in the same state
//! as an uninterrupted run.

use std::collections::{BTreeSet, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PipelineSettings;
use crate::covariation::{build_covariation, split_pairs, ComplexCovariation, ScoreLookup};
use crate::error::ReconError;
use crate::input::CandidateLoad;
use crate::matcher::{match_candidate, ComplexRegistry};
use crate::merge::merge_candidates;
use crate::model::{CandidateComplex, ComplexPlan, CuratedComplex, MatchResult, MatchType};
use crate::reconcile::{Reconciler, TermLookup};
use crate::registry::PlanSink;
use crate::report::{CovariationReports, ReportSet};
use crate::resolver::{resolve_identifiers, IdentifierResolver, RateLimiter, Resolution, ResolverSettings};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run `op`, retrying retryable errors up to `max_retries` times with
/// exponential backoff (`backoff`, `2 * backoff`, ...).
///
/// Non-retryable errors are returned unchanged. Exhausted retries become
/// [`ReconError::ChunkFailed`] for the chunk starting at `offset`.
pub fn with_retries<T, F>(offset: usize, max_retries: u32, backoff: Duration, mut op: F) -> Result<T, ReconError>
where
    F: FnMut() -> Result<T, ReconError>,
{
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = backoff.saturating_mul(1u32 << attempt.min(16));
                attempt += 1;
                log::warn!("attempt {attempt} failed ({e}), retrying in {delay:?}");
                thread::sleep(delay);
            }
            Err(e) if e.is_retryable() => {
                return Err(ReconError::ChunkFailed { offset, attempts: attempt + 1, source: Box::new(e) });
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Carried-forward progress: merged candidates fully processed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed: usize,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(processed: usize) -> Self {
        Self { processed, updated_at: Utc::now() }
    }

    /// Missing file means a fresh start.
    pub fn load(path: &Path) -> Result<Option<Self>, ReconError> {
        match std::fs::read_to_string(path) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<(), ReconError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Plan journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    /// Checkpoint offset that commits this plan.
    through: usize,
    plan: ComplexPlan,
}

/// Append-only JSON-lines log of applied plans, one line per plan.
#[derive(Debug, Clone)]
pub struct PlanJournal {
    path: PathBuf,
}

impl PlanJournal {
    pub fn for_checkpoint(checkpoint: &Path) -> Self {
        Self { path: checkpoint.with_extension("plans.jsonl") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start an empty journal.
    pub fn reset(&self) -> Result<(), ReconError> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Plans committed by a checkpoint at `processed`, in apply order.
    ///
    /// Entries past `processed` belong to a chunk that never checkpointed;
    /// they are dropped from the file as well.
    pub fn committed(&self, processed: usize) -> Result<Vec<ComplexPlan>, ReconError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)?;
            if entry.through <= processed {
                kept.push(entry);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("journal: dropping {dropped} plan(s) past checkpoint {processed}");
            let tmp = self.path.with_extension("tmp");
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in &kept {
                serde_json::to_writer(&mut out, entry)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            drop(out);
            std::fs::rename(&tmp, &self.path)?;
        }
        Ok(kept.into_iter().map(|e| e.plan).collect())
    }

    /// Append the plans of a finished chunk and sync them to disk.
    pub fn append(&self, through: usize, plans: &[ComplexPlan]) -> Result<(), ReconError> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut out = BufWriter::new(file);
        for plan in plans {
            serde_json::to_writer(&mut out, &JournalEntry { through, plan: plan.clone() })?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        out.get_ref().sync_data()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub candidates_in: usize,
    pub merged: usize,
    pub skipped: usize,
    /// Plans from earlier runs re-applied to the sink on resume.
    pub replayed: usize,
    pub processed: usize,
    pub chunks: usize,
    pub no_match: usize,
    pub exact_match: usize,
    pub multiple_exact_matches: usize,
    pub partial_match: usize,
    pub new_complexes: usize,
    pub updated_complexes: usize,
    pub errors: usize,
    pub failed: usize,
}

impl PipelineSummary {
    fn count(&mut self, match_type: MatchType) {
        match match_type {
            MatchType::NoMatch => self.no_match += 1,
            MatchType::ExactMatch => self.exact_match += 1,
            MatchType::MultipleExactMatches => self.multiple_exact_matches += 1,
            MatchType::PartialMatch => self.partial_match += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub summary: PipelineSummary,
    pub plans: Vec<ComplexPlan>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Identifier resolution stage: a service plus its polling and rate limits.
pub struct ResolverStage<'a> {
    pub resolver: &'a dyn IdentifierResolver,
    pub settings: ResolverSettings,
    limiter: RateLimiter,
}

impl<'a> ResolverStage<'a> {
    pub fn new(resolver: &'a dyn IdentifierResolver, settings: ResolverSettings) -> Self {
        let limiter = RateLimiter::per_second(settings.requests_per_second);
        Self { resolver, settings, limiter }
    }

    fn resolve(&self, ids: &[String]) -> Result<Resolution, ReconError> {
        resolve_identifiers(self.resolver, ids, &self.settings, &self.limiter)
    }
}

type ItemResult = Result<(MatchResult, Vec<ComplexPlan>), ReconError>;

pub struct Pipeline<T> {
    settings: PipelineSettings,
    reconciler: Reconciler<T>,
}

impl<T: TermLookup> Pipeline<T> {
    pub fn new(settings: PipelineSettings, reconciler: Reconciler<T>) -> Self {
        Self { settings, reconciler }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn checkpoint_path(&self) -> Option<PathBuf> {
        self.settings.checkpoint.as_ref().map(PathBuf::from)
    }

    /// True when a saved checkpoint will make [`run`](Self::run) resume.
    /// Reports for a resumed run should be opened in append mode.
    pub fn is_resuming(&self) -> Result<bool, ReconError> {
        let Some(path) = self.checkpoint_path() else {
            return Ok(false);
        };
        Ok(Checkpoint::load(&path)?.is_some_and(|cp| cp.processed > 0))
    }

    /// Process a whole batch.
    ///
    /// Rows rejected at load time are written to the error report on a
    /// fresh run only; a resumed run already has them.
    pub fn run<R, S>(
        &self,
        candidates: impl Into<CandidateLoad>,
        registry: &R,
        sink: &S,
        resolver: Option<&ResolverStage<'_>>,
        reports: &ReportSet,
    ) -> Result<PipelineOutcome, ReconError>
    where
        R: ComplexRegistry + ?Sized,
        S: PlanSink + ?Sized,
    {
        let CandidateLoad { candidates, rejected } = candidates.into();
        let mut summary =
            PipelineSummary { candidates_in: candidates.len() + rejected.len(), ..Default::default() };
        let merged = merge_candidates(candidates);
        summary.merged = merged.len();
        log::info!("{} candidate(s) merged into {}", summary.candidates_in, summary.merged);

        let checkpoint_path = self.checkpoint_path();
        let start = match checkpoint_path.as_deref().map(Checkpoint::load).transpose()?.flatten() {
            Some(cp) if cp.processed <= merged.len() => {
                log::info!("resuming after {} processed candidate(s) (checkpoint {})", cp.processed, cp.updated_at);
                cp.processed
            }
            Some(cp) => {
                log::warn!(
                    "checkpoint claims {} processed but batch has {}; starting over",
                    cp.processed,
                    merged.len()
                );
                0
            }
            None => 0,
        };
        summary.skipped = start;

        if start == 0 {
            for row in &rejected {
                reports.error(&row.ids, &row.error.to_string())?;
                summary.errors += 1;
            }
        }

        let mut plans = Vec::new();
        let journal = checkpoint_path.as_deref().map(PlanJournal::for_checkpoint);
        if let Some(journal) = &journal {
            if start == 0 {
                journal.reset()?;
            } else {
                for plan in journal.committed(start)? {
                    match with_retries(start, self.settings.max_retries, self.settings.retry_backoff(), || {
                        sink.apply(&plan)
                    }) {
                        Ok(accession) => log::debug!("replayed plan for {} on {accession}", plan.candidate.key()),
                        Err(e) if e.is_item_level() => {
                            log::warn!("replay of plan for {} failed: {e}", plan.candidate.key());
                        }
                        Err(e) => return Err(e),
                    }
                    summary.replayed += 1;
                    plans.push(plan);
                }
                if summary.replayed > 0 {
                    log::info!("replayed {} committed plan(s) from {}", summary.replayed, journal.path().display());
                }
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers.max(1))
            .build()
            .map_err(|e| ReconError::Infrastructure(format!("worker pool: {e}")))?;

        let mut offset = start;
        for chunk in merged[start..].chunks(self.settings.chunk_size.max(1)) {
            log::info!("chunk at {offset}: {} candidate(s)", chunk.len());
            let ready = self.resolve_chunk(offset, chunk, resolver, reports, &mut summary)?;

            let results: Vec<ItemResult> = pool.install(|| {
                ready
                    .par_iter()
                    .map(|candidate| self.process(offset, candidate, registry))
                    .collect()
            });

            // A chunk that cannot finish writes nothing, so its rows are not
            // duplicated when the rerun repeats it.
            let mut results = results;
            if let Some(i) = results.iter().position(|r| r.as_ref().is_err_and(|e| !e.is_item_level())) {
                if let Err(e) = results.swap_remove(i) {
                    return Err(e);
                }
            }

            let mut applied = Vec::new();
            for (candidate, result) in ready.iter().zip(results) {
                match result {
                    Ok((matched, candidate_plans)) => {
                        summary.count(matched.match_type);
                        reports.matched(candidate, &matched)?;
                        for plan in candidate_plans {
                            if self.write_plan(offset, &plan, sink, reports, &mut summary)? {
                                applied.push(plan.clone());
                            }
                            plans.push(plan);
                        }
                    }
                    Err(e) if e.is_item_level() => {
                        log::warn!("candidate {} skipped: {e}", candidate.key());
                        reports.error(&candidate.ids_joined(), &e.to_string())?;
                        summary.errors += 1;
                    }
                    Err(e) => {
                        reports.flush()?;
                        return Err(e);
                    }
                }
            }

            reports.flush()?;
            offset += chunk.len();
            summary.processed += chunk.len();
            summary.chunks += 1;
            if let Some(journal) = &journal {
                journal.append(offset, &applied)?;
            }
            if let Some(path) = &checkpoint_path {
                Checkpoint::new(offset).save(path)?;
            }
        }

        log::info!(
            "done: {} processed, {} new, {} updated, {} error(s), {} failed",
            summary.processed,
            summary.new_complexes,
            summary.updated_complexes,
            summary.errors,
            summary.failed
        );
        Ok(PipelineOutcome { summary, plans })
    }

    /// Rewrite members through the resolver. Candidates whose members do
    /// not resolve cleanly go to the failed report and drop out.
    fn resolve_chunk(
        &self,
        offset: usize,
        chunk: &[CandidateComplex],
        resolver: Option<&ResolverStage<'_>>,
        reports: &ReportSet,
        summary: &mut PipelineSummary,
    ) -> Result<Vec<CandidateComplex>, ReconError> {
        let Some(stage) = resolver else {
            return Ok(chunk.to_vec());
        };

        let raw: BTreeSet<&String> = chunk.iter().flat_map(|c| c.member_accessions.iter()).collect();
        let raw: Vec<String> = raw.into_iter().cloned().collect();
        let resolution = with_retries(offset, self.settings.max_retries, self.settings.retry_backoff(), || {
            stage.resolve(&raw)
        })?;

        let mut ready = Vec::with_capacity(chunk.len());
        for candidate in chunk {
            match resolution.apply(candidate) {
                Ok(resolved) => ready.push(resolved),
                Err(unresolved) => {
                    let problematic: Vec<String> = unresolved.problematic.into_iter().collect();
                    log::warn!("candidate {} has unresolved members: {}", candidate.key(), problematic.join(" "));
                    reports.failed(candidate, &problematic, &unresolved.reasons)?;
                    summary.failed += 1;
                }
            }
        }
        Ok(ready)
    }

    fn process<R>(&self, offset: usize, candidate: &CandidateComplex, registry: &R) -> ItemResult
    where
        R: ComplexRegistry + ?Sized,
    {
        candidate.validate()?;
        let matched = with_retries(offset, self.settings.max_retries, self.settings.retry_backoff(), || {
            match_candidate(candidate, registry)
        })?;
        let plans = self.reconciler.reconcile(&matched, candidate)?;
        Ok((matched, plans))
    }

    fn write_plan<S>(
        &self,
        offset: usize,
        plan: &ComplexPlan,
        sink: &S,
        reports: &ReportSet,
        summary: &mut PipelineSummary,
    ) -> Result<bool, ReconError>
    where
        S: PlanSink + ?Sized,
    {
        let applied = with_retries(offset, self.settings.max_retries, self.settings.retry_backoff(), || {
            sink.apply(plan)
        });
        match applied {
            Ok(accession) => {
                log::debug!("plan for {} applied to {accession}", plan.candidate.key());
                reports.written(plan)?;
                if plan.is_new_complex() {
                    summary.new_complexes += 1;
                } else {
                    summary.updated_complexes += 1;
                }
                Ok(true)
            }
            Err(e) if e.is_item_level() => {
                reports.error(&plan.candidate.ids_joined(), &e.to_string())?;
                summary.errors += 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Covariation pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct CovariationSummary {
    pub complexes: usize,
    pub pairs_with_score: usize,
    pub pairs_without_score: usize,
    /// Mean coverage over complexes with at least two members.
    pub mean_coverage: Option<f64>,
}

/// Build matrices for every complex in parallel and write the pair reports
/// in accession order.
pub fn run_covariation<L>(
    complexes: &[CuratedComplex],
    lookup: &L,
    reports: &CovariationReports,
) -> Result<(CovariationSummary, Vec<(String, ComplexCovariation)>), ReconError>
where
    L: ScoreLookup + Sync,
{
    let mut built: Vec<(String, ComplexCovariation)> = complexes
        .par_iter()
        .map(|c| (c.accession.clone(), build_covariation(&c.member_accessions, lookup)))
        .collect();
    built.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = CovariationSummary { complexes: built.len(), ..Default::default() };
    let mut coverages = Vec::new();
    for (accession, cov) in &built {
        let (with_score, without_score) = split_pairs(cov, lookup);
        reports.write(accession, &with_score, &without_score)?;
        summary.pairs_with_score += with_score.len();
        summary.pairs_without_score += without_score.len();
        coverages.extend(cov.coverage);
    }
    reports.flush()?;

    if !coverages.is_empty() {
        summary.mean_coverage = Some(coverages.iter().sum::<f64>() / coverages.len() as f64);
    }
    log::info!(
        "covariation: {} complex(es), {} scored pair(s), {} unscored",
        summary.complexes,
        summary.pairs_with_score,
        summary.pairs_without_score
    );
    Ok((summary, built))
}

/// Every member accession of `complexes`, for pre-filtering score loads.
pub fn member_set(complexes: &[CuratedComplex]) -> HashSet<String> {
    complexes.iter().flat_map(|c| c.member_accessions.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_then_succeeds() {
        let calls = Cell::new(0);
        let out = with_retries(0, 3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ReconError::Infrastructure("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_retries_fail_chunk() {
        let calls = Cell::new(0);
        let err = with_retries(500, 2, Duration::from_millis(1), || -> Result<(), ReconError> {
            calls.set(calls.get() + 1);
            Err(ReconError::Infrastructure("down".into()))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        match err {
            ReconError::ChunkFailed { offset, attempts, .. } => {
                assert_eq!(offset, 500);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn item_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = with_retries(0, 5, Duration::from_millis(1), || -> Result<(), ReconError> {
            calls.set(calls.get() + 1);
            Err(ReconError::malformed("H1", "bad"))
        })
        .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(err.is_item_level());
    }

    #[test]
    fn checkpoint_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        assert_eq!(Checkpoint::load(&path).unwrap(), None);

        let cp = Checkpoint::new(42);
        cp.save(&path).unwrap();
        assert_eq!(Checkpoint::load(&path).unwrap().unwrap().processed, 42);
        assert!(!path.with_extension("tmp").exists());
    }

    fn plan(id: &str, accession: &str) -> ComplexPlan {
        ComplexPlan {
            candidate: CandidateComplex::new([id], ["P1", "P2"]),
            match_type: MatchType::ExactMatch,
            complex: crate::model::ComplexRef::Existing(accession.into()),
            xref_ops: Vec::new(),
            annotation_ops: Vec::new(),
        }
    }

    #[test]
    fn journal_keeps_only_checkpointed_plans() {
        let dir = tempfile::tempdir().unwrap();
        let journal = PlanJournal::for_checkpoint(&dir.path().join("checkpoint.json"));
        assert_eq!(journal.path(), dir.path().join("checkpoint.plans.jsonl"));
        assert!(journal.committed(10).unwrap().is_empty());

        journal.append(2, &[plan("H1", "CPX-1"), plan("H2", "CPX-2")]).unwrap();
        journal.append(4, &[plan("H3", "CPX-3")]).unwrap();

        // Checkpoint stopped at 2: the second chunk's plan is discarded
        let kept = journal.committed(2).unwrap();
        assert_eq!(kept.iter().map(|p| p.candidate.key()).collect::<Vec<_>>(), ["H1", "H2"]);
        assert_eq!(journal.committed(4).unwrap().len(), 2);

        journal.reset().unwrap();
        assert!(journal.committed(4).unwrap().is_empty());
    }

    #[test]
    fn resuming_follows_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let settings = PipelineSettings { checkpoint: Some(path.display().to_string()), ..Default::default() };
        let policy = crate::config::SourcePolicy {
            name: "huMAP".into(),
            database_id: "MI:2424".into(),
            identity_qualifier: "MI:0356".into(),
            subset_qualifier: "MI:1344".into(),
            cluster_qualifier: "MI:2386".into(),
            evidence_type: "ECO:0005547".into(),
            confidence_topic: None,
            confidence_format: Default::default(),
        };
        let pipeline = Pipeline::new(settings, Reconciler::new(policy, std::collections::HashMap::<String, String>::new()));
        assert!(!pipeline.is_resuming().unwrap());
        Checkpoint::new(0).save(&path).unwrap();
        assert!(!pipeline.is_resuming().unwrap());
        Checkpoint::new(3).save(&path).unwrap();
        assert!(pipeline.is_resuming().unwrap());
    }

    #[test]
    fn covariation_pass_summary() {
        let dir = tempfile::tempdir().unwrap();
        let reports = CovariationReports::create(dir.path(), &Default::default()).unwrap();
        let complexes = vec![
            CuratedComplex::new("CPX-2", ["P1", "P2", "P3"]),
            CuratedComplex::new("CPX-1", ["P9"]),
        ];
        let lookup = |a: &str, b: &str| if (a, b) == ("P1", "P2") { Some(0.9) } else { None };
        let (summary, built) = run_covariation(&complexes, &lookup, &reports).unwrap();

        assert_eq!(built[0].0, "CPX-1");
        assert_eq!(summary.complexes, 2);
        assert_eq!(summary.pairs_with_score, 1);
        assert_eq!(summary.pairs_without_score, 2);
        let mean = summary.mean_coverage.unwrap();
        assert!((mean - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(member_set(&complexes).len(), 4);
    }
}
