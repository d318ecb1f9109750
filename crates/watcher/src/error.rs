//! Error taxonomy for watch sessions

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by a watch session
///
/// Errors are `Clone` because every `error` subscriber receives its own copy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
    /// Session constructed without any roots
    #[error("no watch roots supplied")]
    NoRoots,

    /// Root could not be turned into an absolute path
    #[error("cannot resolve watch root {path}: {reason}")]
    UnresolvableRoot { path: PathBuf, reason: String },

    /// Configuration could not be parsed or is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The notification backend could not observe a root
    #[error("cannot watch {root}: {reason}")]
    BackendUnavailable { root: PathBuf, reason: String },

    /// Every root failed to register
    #[error("none of the watch roots could be observed")]
    NoRootsAvailable,

    /// Recoverable I/O fault while running
    #[error("i/o error{}: {reason}", display_path(.path))]
    TransientIo {
        path: Option<PathBuf>,
        reason: String,
    },

    /// `start()` called on a session that is already running
    #[error("watch session already started")]
    AlreadyStarted,

    /// `start()` called on a session that has been stopped
    #[error("watch session already stopped")]
    AlreadyStopped,
}

/// Coarse grouping of [`WatchError`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    BackendUnavailable,
    TransientIo,
    Misuse,
}

impl WatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            WatchError::NoRoots
            | WatchError::UnresolvableRoot { .. }
            | WatchError::InvalidConfig(_) => ErrorCategory::Configuration,
            WatchError::BackendUnavailable { .. } | WatchError::NoRootsAvailable => {
                ErrorCategory::BackendUnavailable
            }
            WatchError::TransientIo { .. } => ErrorCategory::TransientIo,
            WatchError::AlreadyStarted | WatchError::AlreadyStopped => ErrorCategory::Misuse,
        }
    }

    pub(crate) fn transient(path: Option<PathBuf>, reason: impl ToString) -> Self {
        WatchError::TransientIo {
            path,
            reason: reason.to_string(),
        }
    }
}

impl From<walkdir::Error> for WatchError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        WatchError::transient(path, err)
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" at {}", p.display()),
        None => String::new(),
    }
}
