use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by `Zoon` construction, mutation, and the process runner.
///
/// Outcomes of the executed program itself (non-zero exit, missing target,
/// timeout) are not errors; they are reported through `RunResult`.
#[derive(Error, Debug)]
pub enum ZoonError {
    /// Malformed caller input: a bad bit-literal, a non-positive timeout,
    /// or an empty command line.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The path given to `Zoon::from_path` is not an existing regular file.
    #[error("No such file: {0:?}")]
    NotFound(PathBuf),

    /// A bit position or byte range falls outside the byte sequence.
    #[error("{what} {index} out of range for length {len}")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// The program exists but could not be started (permission denied,
    /// exec format error, resource exhaustion).
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ZoonError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ZoonError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = ZoonError> = std::result::Result<T, E>;
