//! Session error types

use thiserror::Error;

/// Errors surfaced by [`ContainerSession`](crate::session::ContainerSession).
///
/// A non-zero exit code from a command *inside* the container is not an
/// error; it is reported as data in
/// [`ExecResult`](crate::session::ExecResult). These variants cover the
/// cases where the runtime itself could not be driven.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration failed validation before any runtime call.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// `run` exited non-zero; the container never came up.
    #[error("failed to start container: {stderr}")]
    StartFailed { stderr: String },

    /// The creation call exceeded the pull deadline.
    #[error("container start timed out after {seconds}s (image pull?)")]
    StartTimedOut { seconds: u64 },

    /// Inspect failed, timed out, or produced unparseable output.
    #[error("cannot attach to container '{id}': {reason}")]
    AttachFailed { id: String, reason: String },

    /// The container exists but is not in a running state.
    #[error("container '{id}' is not running")]
    NotRunning { id: String },

    /// start/attach called on a session that already holds an identifier.
    #[error("session already holds container '{id}'")]
    AlreadyStarted { id: String },

    /// execute called before any successful start or attach.
    #[error("container not started")]
    NotStarted,

    /// The command exceeded its deadline. The session remains usable;
    /// the in-container process may still be running.
    #[error("command timed out after {seconds}s")]
    ExecTimedOut { seconds: u64 },

    /// The runtime executable could not be invoked at all.
    #[error("failed to invoke container runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
