use std::{io, time::Duration};

use thiserror::Error;

use crate::models::task::TaskId;

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The requested transition is not legal from the current state.
    #[error("invalid state change: {0}")]
    InvalidStateChange(&'static str),

    /// The task already violated a lifecycle invariant before the call.
    #[error("corrupted task state: {0}")]
    CorruptedState(&'static str),

    /// The operation is forbidden while the task is running.
    #[error("operation not allowed: {0}")]
    NotAllowedOperation(&'static str),

    #[error("process supervision failed: {0}")]
    ProcessSupervisionFailure(#[from] SupervisorError),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),
}

/// Failures of the worker that owns a child process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] io::Error),

    #[error("process {pid} did not exit within {timeout:?} after SIGTERM and was killed")]
    StopTimedOut { pid: u32, timeout: Duration },

    #[error("supervisor worker thread panicked")]
    WorkerPanicked,
}

/// An integer code that maps to no enum variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} code {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: u8,
}

pub type Result<T> = std::result::Result<T, TaskError>;
