// error.rs — Error types for the qcc driver and analysis internals
//
// User-facing failures (unreadable input, malformed JSON, unknown function)
// are `QccError` values propagated with `?`. Broken analysis invariants are
// not recoverable and go through `internal_error`, which logs and panics.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum QccError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write output: {0}")]
    Write(#[from] std::io::Error),
    #[error("malformed module: {0}")]
    Json(#[from] serde_json::Error),
    #[error("module `{module}` has no function named `{function}`")]
    UnknownFunction { module: String, function: String },
}

/// Report a violated internal invariant and abort the current analysis.
#[track_caller]
pub fn internal_error(msg: &str) -> ! {
    tracing::error!(target: "qcc", "internal error: {msg}");
    panic!("internal error: {msg}")
}
