//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; batch schedulers rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | run              | Config, input and batch outcomes         |
//! | 50-59   | resolver         | Identifier mapping service               |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into [`recon_exit_code`] or the command's error handling

use complexrecon::ReconError;

// =============================================================================
// Universal (0, 2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, unreadable config or input file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Run (3-9)
// =============================================================================

/// Config failed to parse or validate.
pub const EXIT_CONFIG_INVALID: u8 = 3;

/// Input file malformed (missing column, bad row).
pub const EXIT_INPUT_INVALID: u8 = 4;

/// Batch finished but some candidates were skipped (errors/failed reports
/// are non-empty). Only returned with `--strict`.
pub const EXIT_ITEMS_SKIPPED: u8 = 5;

/// A chunk exhausted its retries; the batch stopped. Rerun to resume from
/// the checkpoint.
pub const EXIT_CHUNK_FAILED: u8 = 6;

/// Could not write reports, plan or checkpoint.
pub const EXIT_OUTPUT: u8 = 7;

// =============================================================================
// Resolver (50-59)
// =============================================================================

/// Request rejected by the mapping service (4xx other than 429).
pub const EXIT_RESOLVER_REJECTED: u8 = 50;

/// Mapping service unreachable, 5xx or rate limited after retries.
pub const EXIT_RESOLVER_UPSTREAM: u8 = 51;

// =============================================================================
// Engine error mapping
// =============================================================================

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG_INVALID,
        ReconError::MissingColumn { .. } | ReconError::Csv(_) => EXIT_INPUT_INVALID,
        ReconError::ResolverRejected(_) => EXIT_RESOLVER_REJECTED,
        ReconError::MalformedInput { .. } | ReconError::LookupNotFound { .. } => EXIT_INPUT_INVALID,
        ReconError::ChunkFailed { .. } => EXIT_CHUNK_FAILED,
        ReconError::Infrastructure(_) => EXIT_RESOLVER_UPSTREAM,
        ReconError::Io(_) | ReconError::Serialization(_) => EXIT_OUTPUT,
    }
}
