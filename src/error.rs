//! Error types for instance provisioning and lifecycle management.
//!
//! Boot polling retries CLI failures locally; everything else surfaces
//! here and is terminal for the instance that produced it.

use std::path::PathBuf;
use std::process::ExitStatus;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Harness errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The loopback pool has no addresses left. Sticky for the allocator.
    #[error("out of loopback addresses")]
    AddressSpaceExhausted,

    /// Holding the control port failed for a reason other than `AddrInUse`.
    #[error("failed to hold {address}:{port}: {source}")]
    AddressBind {
        address: std::net::Ipv4Addr,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error while provisioning or inspecting the sandbox.
    #[error("filesystem error in {context}: {source}")]
    FileSystem {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The server binary could not be located.
    #[error("binary '{name}' not found: {reason}")]
    BinaryNotFound { name: String, reason: String },

    /// Spawning a subprocess failed.
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or signalling a spawned process failed.
    #[error("process error in {context}: {source}")]
    Process {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The server never reported itself fully booted.
    #[error("asterisk failed to start after {attempts} attempts")]
    BootTimeout { attempts: u32 },

    /// A CLI command was issued before the binary path was resolved.
    #[error("not started")]
    NotStarted,

    /// A subprocess exited unsuccessfully.
    #[error("command '{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Operation called from a lifecycle state that does not permit it.
    #[error("cannot {operation} while instance is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// The refcounter reported leaked references.
    #[error("reference leaks detected in {log:?}: {report}")]
    LeakDetected { log: PathBuf, report: String },

    /// Writing the AMI trace file failed.
    #[error("AMI trace error in {path:?}: {source}")]
    Trace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The administrative session failed.
    #[error("AMI error: {0}")]
    Ami(String),

    /// Watched events did not match expectations.
    #[error("AMI events mismatch: {0}")]
    EventMismatch(#[from] crate::ami::EventMismatch),
}

impl Error {
    /// Create a filesystem error with context.
    pub fn fs(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileSystem {
            context: context.into(),
            source,
        }
    }

    /// Create a spawn error for the given program.
    pub fn spawn(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a process error with context.
    pub fn process(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Process {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(operation: &'static str, state: impl ToString) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a trace file error for `path`.
    pub fn trace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Trace {
            path: path.into(),
            source,
        }
    }

    /// Create an AMI session error.
    pub fn ami(reason: impl Into<String>) -> Self {
        Self::Ami(reason.into())
    }

    /// Returns true if the instance that produced this error must be discarded.
    ///
    /// `NotStarted`, `InvalidState`, failed CLI commands and event
    /// mismatches leave the instance usable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::NotStarted
                | Self::InvalidState { .. }
                | Self::CommandFailed { .. }
                | Self::EventMismatch(_)
        )
    }
}
