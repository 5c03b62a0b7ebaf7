//! Batch-level errors.
//!
//! Per-item engine failures never show up here: the pipeline recovers them
//! into passthrough results. These are the failures that stop a whole run
//! or reject a controller event.

use thiserror::Error;

use crate::controller::SessionState;

pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Error, Debug)]
pub enum BatchError {
    /// Processing was requested with nothing queued.
    #[error("No files selected")]
    EmptyBatch,

    /// Remove/download addressed an item that does not exist.
    #[error("Index {index} out of range for {len} item(s)")]
    IndexOutOfRange { index: usize, len: usize },

    /// The event is not allowed in the current session state.
    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    /// No result is available to download yet.
    #[error("Nothing to download")]
    NoResult,

    /// The transform engine could not be started.
    #[error("Engine initialisation failed: {0}")]
    EngineInit(String),

    #[error("Failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BatchError {
    pub fn invalid_state(action: &'static str, state: SessionState) -> Self {
        Self::InvalidState { action, state }
    }
}
