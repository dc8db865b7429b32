//! CLI error types.

use thiserror::Error;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The accessor could not be constructed or a tileset failed to load.
    #[error("failed to load tileset: {0}")]
    TilesetLoad(String),

    /// Command arguments were inconsistent or out of range.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Writing an output file failed.
    #[error("failed to write output: {0}")]
    OutputWrite(String),
}
