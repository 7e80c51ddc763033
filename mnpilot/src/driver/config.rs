//! Session-scoped configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ClassifierConfig;
use crate::credential::Credential;
use crate::transport::SshConfig;

/// How the simulation is driven once it is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Leave the simulator's REPL immediately and wait for completion.
    #[default]
    Automated,

    /// Hand the simulator's REPL to the local operator.
    Interactive,
}

/// A command loop started by the remote program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRepl {
    /// Ready prompt printed when the REPL accepts input.
    pub banner: String,

    /// Command that leaves the REPL.
    pub exit_command: String,
}

impl Default for SubRepl {
    fn default() -> Self {
        Self {
            banner: "mininet>".to_string(),
            exit_command: "exit".to_string(),
        }
    }
}

/// Delays and thresholds used by the driver and the reader task.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Pause after the shell opens before the command is typed.
    pub shell_ready: Duration,

    /// Pause between recognizing a password prompt and typing the secret.
    pub grace: Duration,

    /// Pause after typing a REPL exit or logout command.
    pub settle: Duration,

    /// Silence after which a waiting credential prompt is assumed.
    pub quiet_threshold: Duration,

    /// How often the silence is re-evaluated.
    pub quiet_rearm: Duration,

    /// Silence after which a newline-less partial line is classified.
    pub partial_flush: Duration,

    /// How long to let the reader drain after the session is torn down.
    pub drain: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            shell_ready: Duration::from_millis(500),
            grace: Duration::from_millis(300),
            settle: Duration::from_millis(500),
            quiet_threshold: Duration::from_secs(2),
            quiet_rearm: Duration::from_secs(3),
            partial_flush: Duration::from_millis(500),
            drain: Duration::from_secs(5),
        }
    }
}

/// Immutable configuration for one remote run.
///
/// Built with [`SessionBuilder`](super::SessionBuilder) and consumed once
/// at session construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection settings.
    pub ssh: SshConfig,

    /// Escalation secret.
    pub credential: Credential,

    /// Privileged command to run in the remote shell.
    pub command: String,

    /// Automated or interactive.
    pub mode: Mode,

    /// The remote program's own REPL, if it starts one.
    pub sub_repl: Option<SubRepl>,

    /// Command that ends the login shell.
    pub logout_command: String,

    /// Upper bound on the whole run, measured from Idle.
    pub deadline: Duration,

    /// Delays and thresholds.
    pub timing: Timing,

    /// Remote exit statuses treated as a normal end (e.g. 130 after Ctrl-C).
    pub benign_exit_codes: Vec<u32>,
}

impl SessionConfig {
    /// Settings for the line classifier.
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            banner: self.sub_repl.as_ref().map(|r| r.banner.clone()),
            quiet_threshold: self.timing.quiet_threshold,
            quiet_rearm: self.timing.quiet_rearm,
        }
    }

    /// The keyword that ends an interactive handoff.
    pub fn exit_keyword(&self) -> &str {
        self.sub_repl
            .as_ref()
            .map(|r| r.exit_command.as_str())
            .unwrap_or("exit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_deserializes_lowercase() {
        let mode: Mode = serde_json::from_str("\"interactive\"").unwrap();
        assert_eq!(mode, Mode::Interactive);
        assert_eq!(serde_json::to_string(&Mode::Automated).unwrap(), "\"automated\"");
    }

    #[test]
    fn test_sub_repl_defaults() {
        let repl = SubRepl::default();
        assert_eq!(repl.banner, "mininet>");
        assert_eq!(repl.exit_command, "exit");
    }
}
