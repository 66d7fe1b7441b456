//! `complexrecon covariation`: pairwise covariation matrices for registry
//! complexes.

use std::path::PathBuf;

use complexrecon::covariation::{load_scores, LoadOptions};
use complexrecon::pipeline::{member_set, run_covariation};
use complexrecon::report::CovariationReports;

use crate::exit_codes::{EXIT_CONFIG_INVALID, EXIT_OUTPUT};
use crate::recon::LoadedConfig;
use crate::CliError;

pub fn cmd_covariation(config_path: PathBuf, json_output: bool, matrices_file: Option<PathBuf>) -> Result<(), CliError> {
    let loaded = LoadedConfig::read(&config_path)?;
    let Some(cov_config) = loaded.config.covariation.clone() else {
        return Err(CliError {
            code: EXIT_CONFIG_INVALID,
            message: "config has no [covariation] section".into(),
            hint: Some("add [covariation] with at least `scores = \"<file>\"`".into()),
        });
    };

    let complexes = loaded.load_complexes()?;
    let keep = member_set(&complexes);

    let data = loaded.read_input(&cov_config.scores)?;
    let options = LoadOptions {
        delimiter: cov_config.delimiter,
        has_header: cov_config.has_header,
        partitions: cov_config.partitions,
    };
    let store = load_scores(&data, &options, Some(&keep)).map_err(CliError::recon)?;

    let report_dir = loaded.path(&loaded.config.reports.dir);
    let reports = CovariationReports::create(&report_dir, &loaded.report_options()).map_err(CliError::recon)?;
    let (summary, matrices) = run_covariation(&complexes, &store, &reports).map_err(CliError::recon)?;

    if let Some(ref path) = matrices_file {
        let map: serde_json::Map<String, serde_json::Value> = matrices
            .into_iter()
            .map(|(ac, cov)| serde_json::to_value(cov).map(|v| (ac, v)))
            .collect::<Result<_, _>>()
            .map_err(|e| CliError { code: EXIT_OUTPUT, message: format!("JSON serialization error: {e}"), hint: None })?;
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| CliError { code: EXIT_OUTPUT, message: format!("JSON serialization error: {e}"), hint: None })?;
        std::fs::write(path, text).map_err(|e| CliError {
            code: EXIT_OUTPUT,
            message: format!("cannot write {}: {e}", path.display()),
            hint: None,
        })?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError { code: EXIT_OUTPUT, message: format!("JSON serialization error: {e}"), hint: None })?;
        println!("{text}");
    }

    eprintln!(
        "covariation: {} complex(es), {} scored pair(s), {} unscored, mean coverage {}",
        summary.complexes,
        summary.pairs_with_score,
        summary.pairs_without_score,
        summary.mean_coverage.map(|c| format!("{c:.3}")).unwrap_or_else(|| "n/a".into()),
    );
    Ok(())
}
