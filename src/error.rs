//! Error types for each stage of a profiling run.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::session::SessionState;

/// Bad or missing command line input. Always reported with the usage text.
#[derive(Error, Debug)]
pub enum UsageError {
    /// Rejected by the argument parser itself (unknown flag, missing value,
    /// malformed value).
    #[error("{0}")]
    Cli(String),

    #[error("must specify a script to run")]
    MissingScript,

    #[error("invalid exclusion '{0}', expected SCOPE#METHOD or SCOPE.METHOD")]
    MalformedExclusion(String),

    #[error("cannot exclude '{entry}': {source}")]
    Resolution {
        entry: String,
        #[source]
        source: ResolutionError,
    },

    #[error("'{path}' must be an existing directory for the {printer} printer")]
    NotADirectory { path: PathBuf, printer: &'static str },

    #[error("failed to read the current directory: {0}")]
    WorkingDir(#[source] io::Error),
}

/// A qualified name that does not map to a scope in the symbol space.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("wrong symbol name '{0}'")]
    Malformed(String),

    #[error("uninitialized symbol {0}")]
    Unknown(String),
}

/// A pre-session library load or snippet evaluation failed.
#[derive(Error, Debug)]
pub enum PreludeError {
    #[error("cannot load such library -- {0}")]
    LibraryNotFound(String),

    #[error("'{path}' is not a loadable library: {reason}")]
    NotALibrary { path: PathBuf, reason: String },

    #[error("failed to evaluate '{code}': {status}")]
    Evaluation { code: String, status: ExitStatus },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A failure raised by the measured workload.
#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("failed to launch {script:?}: {source}")]
    Launch {
        script: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{script:?} exited with {status}")]
    Exited { script: PathBuf, status: ExitStatus },

    #[error("{0}")]
    Raised(String),

    #[error("session is {found:?}, expected {expected:?}")]
    State { expected: SessionState, found: SessionState },
}

/// The report could not be written to its destination.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("failed to change directory to {path:?}: {source}")]
    ChangeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render report: {0}")]
    Render(#[from] io::Error),
}
