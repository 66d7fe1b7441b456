//! UniProt ID-mapping client.
//!
//! Implements the engine's [`IdentifierResolver`] over the asynchronous
//! REST API:
//!
//! - `POST /idmapping/run` (form: `from`, `to`, `ids`) returns `{"jobId": …}`
//! - `GET /idmapping/status/{jobId}` returns `{"jobStatus": …}`, or the results
//!   themselves once the job is done
//! - `GET /idmapping/stream/{jobId}` returns `{"results": [{"from": …, "to": …}]}`
//!
//! Transport retries (429, 5xx, network) happen here with exponential
//! backoff. Once they run out the error surfaces as an infrastructure error
//! and the pipeline's chunk-level retry takes over.

use std::thread;
use std::time::Duration;

use complexrecon::config::ResolverConfig;
use complexrecon::resolver::{IdMapping, IdentifierResolver, JobStatus};
use complexrecon::ReconError;

const MAX_RETRIES: u32 = 3;
const USER_AGENT: &str = concat!("complexrecon/", env!("CARGO_PKG_VERSION"));

pub struct UniprotResolver {
    http: reqwest::blocking::Client,
    base_url: String,
    from_db: String,
    to_db: String,
    backoff: Duration,
}

impl UniprotResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, ReconError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ReconError::Infrastructure(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            from_db: config.from_db.clone(),
            to_db: config.to_db.clone(),
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay before the first transport retry; doubles per attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send with retry + exponential backoff, returning the parsed JSON body.
    fn request_with_retry(
        &self,
        what: &str,
        build_request: impl Fn(&reqwest::blocking::Client) -> reqwest::blocking::RequestBuilder,
    ) -> Result<serde_json::Value, ReconError> {
        let mut backoff = self.backoff;

        for attempt in 0..=MAX_RETRIES {
            match build_request(&self.http).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    if status == 429 || status >= 500 {
                        if attempt == MAX_RETRIES {
                            return Err(ReconError::Infrastructure(format!(
                                "{what}: HTTP {status} after {} attempts",
                                MAX_RETRIES + 1
                            )));
                        }
                        let wait = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(backoff);
                        tracing::warn!("{what}: retry {}/{} in {:?} (HTTP {status})", attempt + 1, MAX_RETRIES, wait);
                        thread::sleep(wait);
                        backoff *= 2;
                        continue;
                    }

                    let text = resp
                        .text()
                        .map_err(|e| ReconError::Infrastructure(format!("{what}: cannot read body: {e}")))?;

                    if status >= 400 {
                        return Err(ReconError::ResolverRejected(format!(
                            "{what} ({status}): {}",
                            error_message(&text)
                        )));
                    }

                    return serde_json::from_str(&text).map_err(|e| {
                        ReconError::Infrastructure(format!(
                            "{what}: invalid JSON ({e}): {}",
                            text.chars().take(200).collect::<String>()
                        ))
                    });
                }
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(ReconError::Infrastructure(format!(
                            "{what}: {e} after {} attempts",
                            MAX_RETRIES + 1
                        )));
                    }
                    tracing::warn!("{what}: retry {}/{} in {:?} ({e})", attempt + 1, MAX_RETRIES, backoff);
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }

        Err(ReconError::Infrastructure(format!("{what}: retries exhausted")))
    }
}

/// UniProt errors look like `{"url": …, "messages": ["…"]}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("messages")?
                .as_array()
                .map(|m| m.iter().filter_map(|s| s.as_str()).collect::<Vec<_>>().join("; "))
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// `to` is a plain accession, or an entry object when mapping into UniProtKB.
fn mapping_target(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o.get("primaryAccession")?.as_str().map(str::to_string),
        _ => None,
    }
}

impl IdentifierResolver for UniprotResolver {
    fn submit(&self, ids: &[String]) -> Result<String, ReconError> {
        let joined = ids.join(",");
        let body = self.request_with_retry("submit", |http| {
            http.post(self.url("/idmapping/run")).form(&[
                ("from", self.from_db.as_str()),
                ("to", self.to_db.as_str()),
                ("ids", joined.as_str()),
            ])
        })?;
        body.get("jobId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ReconError::Infrastructure("submit: response has no jobId".into()))
    }

    fn status(&self, job_id: &str) -> Result<JobStatus, ReconError> {
        let body = self.request_with_retry("status", |http| {
            http.get(self.url(&format!("/idmapping/status/{job_id}")))
        })?;
        match body.get("jobStatus").and_then(|v| v.as_str()) {
            Some(status) => Ok(JobStatus::parse(status)),
            // Finished jobs redirect to their results
            None if body.get("results").is_some() => Ok(JobStatus::Finished),
            None => Err(ReconError::Infrastructure(format!("status: job {job_id} has no jobStatus"))),
        }
    }

    fn stream(&self, job_id: &str) -> Result<Vec<IdMapping>, ReconError> {
        let body = self.request_with_retry("stream", |http| {
            http.get(self.url(&format!("/idmapping/stream/{job_id}")))
        })?;
        let results = body
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ReconError::Infrastructure(format!("stream: job {job_id} has no results")))?;

        let mut mappings = Vec::with_capacity(results.len());
        for r in results {
            let from = r.get("from").and_then(|v| v.as_str());
            let to = r.get("to").and_then(mapping_target);
            match (from, to) {
                (Some(from), Some(to)) => mappings.push(IdMapping { from: from.to_string(), to }),
                _ => tracing::warn!("stream: skipping malformed result {r}"),
            }
        }
        if let Some(failed) = body.get("failedIds").and_then(|v| v.as_array()) {
            tracing::info!("{} id(s) did not map", failed.len());
        }
        Ok(mappings)
    }
}
