//! SSH transport layer wrapping russh.
//!
//! This module owns the authenticated connection, hands out the interactive
//! shell channel, and runs the one-shot commands used for file transfer.

pub mod config;
mod shell;
mod ssh;

use std::future::Future;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use shell::{ChannelEvent, ShellChannel, ShellReader, ShellWriter};
pub use ssh::SshTransport;

use crate::error::Result;

/// Output of a non-interactive remote command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Captured stdout.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: Vec<u8>,

    /// Exit status, if the remote reported one.
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Stdout as a string (lossy UTF-8).
    pub fn stdout_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }
}

/// An authenticated connection to the remote host.
///
/// Implemented by [`SshTransport`]; tests provide a scripted stub.
pub trait Transport: Send {
    /// Allocate a PTY of the given size and start a login shell on it.
    fn open_shell(&mut self, width: u32, height: u32)
    -> impl Future<Output = Result<ShellChannel>> + Send;

    /// Run a command to completion and collect its output.
    fn exec(&mut self, command: &str) -> impl Future<Output = Result<ExecOutput>> + Send;

    /// Write `contents` to `remote_path` on the remote host.
    fn write_file(
        &mut self,
        contents: &[u8],
        remote_path: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Disconnect. Called exactly once per session.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Quote a string for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
