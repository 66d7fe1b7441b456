//! `complexrecon run` / `complexrecon validate`: config-driven candidate
//! reconciliation.

use std::path::{Path, PathBuf};

use complexrecon::config::ReconConfig;
use complexrecon::input::{attach_annotations, attach_xrefs, load_candidates, load_complexes, CandidateLoad};
use complexrecon::model::CuratedComplex;
use complexrecon::pipeline::{Pipeline, ResolverStage};
use complexrecon::report::{ReportOptions, ReportSet};
use complexrecon::{InMemoryRegistry, Reconciler};

use crate::exit_codes::{EXIT_CONFIG_INVALID, EXIT_ITEMS_SKIPPED, EXIT_OUTPUT, EXIT_USAGE};
use crate::uniprot::UniprotResolver;
use crate::CliError;

fn run_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

/// A parsed config plus the directory its relative paths resolve against.
pub(crate) struct LoadedConfig {
    pub config: ReconConfig,
    pub base_dir: PathBuf,
}

impl LoadedConfig {
    pub fn read(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| run_err(EXIT_USAGE, format!("cannot read config {}: {e}", path.display())))?;
        let config = ReconConfig::from_toml(&text).map_err(|e| {
            run_err(EXIT_CONFIG_INVALID, e.to_string())
                .with_hint("run `complexrecon validate` for the full config check")
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { config, base_dir })
    }

    /// Resolve a config path relative to the config file's directory.
    pub fn path(&self, rel: &str) -> PathBuf {
        let p = Path::new(rel);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn read_input(&self, rel: &str) -> Result<String, CliError> {
        let path = self.path(rel);
        std::fs::read_to_string(&path)
            .map_err(|e| run_err(EXIT_USAGE, format!("cannot read {}: {e}", path.display())))
    }

    /// Valid candidates plus the rows rejected on load.
    pub fn load_candidates(&self) -> Result<CandidateLoad, CliError> {
        let data = self.read_input(&self.config.input.candidates)?;
        load_candidates(&data, self.config.input.delimiter).map_err(CliError::recon)
    }

    /// Registry complexes with their xrefs and annotations attached.
    pub fn load_complexes(&self) -> Result<Vec<CuratedComplex>, CliError> {
        let input = &self.config.input;
        let data = self.read_input(&input.complexes)?;
        let mut complexes = load_complexes(&data, input.delimiter).map_err(CliError::recon)?;

        if let Some(ref xrefs) = input.xrefs {
            let data = self.read_input(xrefs)?;
            let n = attach_xrefs(&mut complexes, &data, input.delimiter).map_err(CliError::recon)?;
            tracing::info!("attached {n} xref(s)");
        }
        if let Some(ref annotations) = input.annotations {
            let data = self.read_input(annotations)?;
            let n = attach_annotations(&mut complexes, &data, input.delimiter).map_err(CliError::recon)?;
            tracing::info!("attached {n} annotation(s)");
        }
        tracing::info!("loaded {} registry complex(es)", complexes.len());
        Ok(complexes)
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions::from_config(&self.config.reports, self.config.source.confidence_format)
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| run_err(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;
    std::fs::write(path, text)
        .map_err(|e| run_err(EXIT_OUTPUT, format!("cannot write {}: {e}", path.display())))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

// ============================================================================
// run
// ============================================================================

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    plan_file: Option<PathBuf>,
    registry_file: Option<PathBuf>,
    strict: bool,
) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let config = &loaded.config;

    let candidates = loaded.load_candidates()?;
    let registry = InMemoryRegistry::with_complexes(config.accession_prefix.clone(), loaded.load_complexes()?);

    let mut settings = config.pipeline.clone();
    settings.checkpoint = settings
        .checkpoint
        .as_deref()
        .map(|p| loaded.path(p).to_string_lossy().into_owned());

    let reconciler = Reconciler::new(config.source.clone(), config.terms.clone());
    let pipeline = Pipeline::new(settings, reconciler);

    let report_dir = loaded.path(&config.reports.dir);
    let mut options = loaded.report_options();
    options.append = pipeline.is_resuming().map_err(CliError::recon)?;
    if options.append {
        tracing::info!("checkpoint found; appending to reports in {}", report_dir.display());
    }
    let reports = ReportSet::create(&report_dir, options).map_err(CliError::recon)?;

    let uniprot = config.resolver.as_ref().map(UniprotResolver::new).transpose().map_err(CliError::recon)?;
    let stage = match (&uniprot, &config.resolver) {
        (Some(client), Some(resolver_config)) => Some(ResolverStage::new(client, resolver_config.settings())),
        _ => None,
    };

    tracing::info!(
        "running '{}' ({} candidate(s), {} rejected row(s))",
        config.name,
        candidates.candidates.len(),
        candidates.rejected.len()
    );
    let outcome = pipeline
        .run(candidates, &registry, &registry, stage.as_ref(), &reports)
        .map_err(|e| {
            let resumable = config.pipeline.checkpoint.is_some();
            let err = CliError::recon(e);
            if resumable {
                err.with_hint("rerun the same command to resume from the checkpoint")
            } else {
                err
            }
        })?;

    if let Some(ref path) = plan_file {
        write_json(path, &outcome.plans)?;
    }
    if let Some(ref path) = registry_file {
        write_json(path, &registry.snapshot())?;
    }
    if json_output {
        let text = serde_json::to_string_pretty(&outcome.summary)
            .map_err(|e| run_err(EXIT_OUTPUT, format!("JSON serialization error: {e}")))?;
        println!("{text}");
    }

    // Human summary to stderr
    let s = &outcome.summary;
    eprintln!(
        "{}: {} candidate(s) -> {} merged, {} processed ({} skipped by checkpoint, {} replayed plan(s))",
        config.name, s.candidates_in, s.merged, s.processed, s.skipped, s.replayed,
    );
    eprintln!(
        "matches: {} none, {} exact, {} multiple exact, {} partial",
        s.no_match, s.exact_match, s.multiple_exact_matches, s.partial_match,
    );
    eprintln!(
        "writes: {} new complex(es), {} updated; {} error(s), {} failed; reports in {}",
        s.new_complexes,
        s.updated_complexes,
        s.errors,
        s.failed,
        report_dir.display(),
    );

    if strict && (s.errors > 0 || s.failed > 0) {
        return Err(run_err(
            EXIT_ITEMS_SKIPPED,
            format!("{} candidate(s) skipped", s.errors + s.failed),
        )
        .with_hint("see errors.csv and failed.csv in the report directory"));
    }
    Ok(())
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let config = &loaded.config;
    let input = &config.input;

    let mut files = vec![("candidates", input.candidates.as_str()), ("complexes", input.complexes.as_str())];
    if let Some(ref x) = input.xrefs {
        files.push(("xrefs", x.as_str()));
    }
    if let Some(ref a) = input.annotations {
        files.push(("annotations", a.as_str()));
    }
    if let Some(ref cov) = config.covariation {
        files.push(("covariation scores", cov.scores.as_str()));
    }
    for (what, rel) in &files {
        let path = loaded.path(rel);
        if !path.is_file() {
            return Err(run_err(EXIT_USAGE, format!("{what} file not found: {}", path.display())));
        }
    }

    // Every term the source policy needs must be known up front
    let s = &config.source;
    let mut required = vec![
        &s.database_id,
        &s.identity_qualifier,
        &s.subset_qualifier,
        &s.cluster_qualifier,
        &s.evidence_type,
    ];
    required.extend(s.confidence_topic.as_ref());
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|id| !config.terms.contains_key(id.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(run_err(EXIT_CONFIG_INVALID, format!("terms missing from [terms]: {}", missing.join(", ")))
            .with_hint("every candidate would fail with a lookup error"));
    }

    eprintln!(
        "ok: '{}' (source {}, {} input file(s), resolver {})",
        config.name,
        s.name,
        files.len(),
        if config.resolver.is_some() { "on" } else { "off" },
    );
    Ok(())
}
