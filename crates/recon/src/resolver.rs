//! Identifier resolution against an asynchronous mapping service.
//!
//! The service contract is submit, then poll, then stream. Transport lives with the
//! caller (see the CLI's UniProt client); this module owns the polling
//! loop, rate limiting, and how mappings are applied to candidates.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::ReconError;
use crate::model::CandidateComplex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    New,
    Queued,
    Running,
    Finished,
    Failed(String),
}

impl JobStatus {
    /// Parse a status string as reported by the service.
    pub fn parse(value: &str) -> Self {
        match value {
            "NEW" => Self::New,
            "QUEUED" => Self::Queued,
            "RUNNING" => Self::Running,
            "FINISHED" => Self::Finished,
            other => Self::Failed(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapping {
    pub from: String,
    pub to: String,
}

/// Batched, asynchronous identifier resolution.
pub trait IdentifierResolver: Sync {
    fn submit(&self, ids: &[String]) -> Result<String, ReconError>;
    fn status(&self, job_id: &str) -> Result<JobStatus, ReconError>;
    fn stream(&self, job_id: &str) -> Result<Vec<IdMapping>, ReconError>;
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub requests_per_second: u32,
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Enforces a fixed minimum spacing between requests.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_second(requests: u32) -> Self {
        let interval = Duration::from_secs(1) / requests.max(1);
        Self { interval, last: Mutex::new(None) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next request may go out.
    pub fn acquire(&self) {
        let mut last = self.last.lock();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Raw id to the accessions it mapped to. Ids with no entry did not map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub mapped: BTreeMap<String, BTreeSet<String>>,
}

/// Why a candidate member could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedMembers {
    pub problematic: BTreeSet<String>,
    pub reasons: Vec<String>,
}

impl Resolution {
    pub fn from_mappings(mappings: Vec<IdMapping>) -> Self {
        let mut mapped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for m in mappings {
            mapped.entry(m.from).or_default().insert(m.to);
        }
        Self { mapped }
    }

    /// Rewrite a candidate's members to resolved accessions. Members that map
    /// to nothing, or to more than one accession, make the candidate unusable.
    pub fn apply(&self, candidate: &CandidateComplex) -> Result<CandidateComplex, UnresolvedMembers> {
        let mut members = BTreeSet::new();
        let mut problematic = BTreeSet::new();
        let mut reasons = Vec::new();

        for raw in &candidate.member_accessions {
            match self.mapped.get(raw) {
                Some(targets) if targets.len() == 1 => {
                    members.extend(targets.iter().cloned());
                }
                Some(targets) => {
                    problematic.insert(raw.clone());
                    reasons.push(format!(
                        "{raw} maps to {} accessions ({})",
                        targets.len(),
                        targets.iter().cloned().collect::<Vec<_>>().join(" ")
                    ));
                }
                None => {
                    problematic.insert(raw.clone());
                    reasons.push(format!("{raw} has no accession mapping"));
                }
            }
        }

        if !problematic.is_empty() {
            return Err(UnresolvedMembers { problematic, reasons });
        }

        Ok(CandidateComplex { member_accessions: members, ..candidate.clone() })
    }
}

/// Submit `ids`, poll until the job is terminal, then stream its results.
///
/// New/Queued/Running are polled again after `poll_interval`. Both
/// submission and polling go through `limiter`. Failed jobs and jobs
/// still pending after `max_polls` are infrastructure errors.
pub fn resolve_identifiers<R>(
    resolver: &R,
    ids: &[String],
    settings: &ResolverSettings,
    limiter: &RateLimiter,
) -> Result<Resolution, ReconError>
where
    R: IdentifierResolver + ?Sized,
{
    if ids.is_empty() {
        return Ok(Resolution::default());
    }

    limiter.acquire();
    let job_id = resolver.submit(ids)?;
    log::info!("submitted {} identifier(s) for resolution as job {job_id}", ids.len());

    let mut polls = 0u32;
    loop {
        limiter.acquire();
        let status = resolver.status(&job_id)?;
        match status {
            JobStatus::Finished => break,
            JobStatus::Failed(state) => {
                return Err(ReconError::Infrastructure(format!(
                    "resolution job {job_id} ended in state {state}"
                )));
            }
            pending => {
                polls += 1;
                if polls >= settings.max_polls {
                    return Err(ReconError::Infrastructure(format!(
                        "resolution job {job_id} still {pending:?} after {polls} polls"
                    )));
                }
                log::debug!("job {job_id} is {pending:?}, polling again");
                thread::sleep(settings.poll_interval);
            }
        }
    }

    limiter.acquire();
    let mappings = resolver.stream(&job_id)?;
    log::info!("job {job_id} returned {} mapping(s)", mappings.len());
    Ok(Resolution::from_mappings(mappings))
}
