//! Error type shared by the tokenwatt library.

use std::path::PathBuf;

/// Errors surfaced to the operator.
///
/// Failures local to one sample line or one control command never become an
/// `Error`; they are logged and skipped inside the loop that owns them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} exists and is not a FIFO", .0.display())]
    NotAFifo(PathBuf),

    #[error("{} is already served by a running sampler", .0.display())]
    EndpointInUse(PathBuf),

    #[error("no sampler is listening on {} (is `tokenwatt monitor` running?)", .0.display())]
    SamplerUnavailable(PathBuf),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid token count '{0}'")]
    InvalidTokenCount(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
