//! Error types for mnpilot.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::driver::Phase;

/// Main error type for mnpilot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shell channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Artifact upload / result retrieval errors
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Driver configuration errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// A remote session failed at a particular phase
    #[error("{0}")]
    Session(#[from] SessionError),
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Host is not present in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Shell channel errors (PTY allocation, reads and writes).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open PTY channel
    #[error("Failed to open PTY channel: {0}")]
    PtyOpenFailed(String),

    /// Failed to request shell
    #[error("Failed to request shell: {0}")]
    ShellRequestFailed(String),

    /// The write path broke mid-session
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),
}

/// Artifact upload and result retrieval errors.
#[derive(Error, Debug)]
pub enum TransferError {
    /// A local artifact does not exist
    #[error("Local file does not exist: {0}")]
    MissingLocalFile(String),

    /// Local filesystem error
    #[error("Local I/O error on {path}: {source}")]
    Local {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Remote command exited with a failure status
    #[error("Remote command '{command}' failed with status {status}: {stderr}")]
    RemoteCommand {
        command: String,
        status: u32,
        stderr: String,
    },
}

/// Driver configuration errors.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Invalid configuration in the session builder
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// A fatal session failure, tagged with the phase it occurred in.
#[derive(Error, Debug)]
#[error("session failed during {phase}: {kind}")]
pub struct SessionError {
    /// Phase the driver was in when the failure surfaced.
    pub phase: Phase,

    /// What went wrong.
    pub kind: SessionErrorKind,
}

impl SessionError {
    /// Create a new session error.
    pub fn new(phase: Phase, kind: SessionErrorKind) -> Self {
        Self { phase, kind }
    }
}

/// Classification of fatal session failures.
#[derive(Error, Debug)]
pub enum SessionErrorKind {
    /// The transport could not be established
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// The interactive channel could not be allocated
    #[error("channel allocation failed: {0}")]
    Channel(#[source] ChannelError),

    /// The write path broke ("transport lost")
    #[error("transport lost: {0}")]
    Write(#[source] ChannelError),

    /// Deadline passed without seeing an escalation prompt
    #[error("no escalation prompt observed before the deadline")]
    EscalationTimeout,

    /// Deadline passed without the task completing
    #[error("execution timeout")]
    ExecutionTimeout,

    /// Remote side closed before the task completed
    #[error("remote closed the session early (exit status {exit_status:?})")]
    TransportClosedEarly { exit_status: Option<u32> },

    /// An artifact could not be uploaded
    #[error("artifact upload failed: {0}")]
    Upload(#[source] TransferError),
}

/// Result type alias using mnpilot's Error.
pub type Result<T> = std::result::Result<T, Error>;
