//! Builder for session configuration.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::config::{Mode, SessionConfig, SubRepl, Timing};
use crate::credential::Credential;
use crate::error::{DriverError, Result};
use crate::transport::config::{AuthMethod, HostKeyVerification, SshConfig};

/// Builder for [`SessionConfig`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use mnpilot::{Mode, SessionBuilder};
///
/// # fn example() -> Result<(), mnpilot::Error> {
/// let config = SessionBuilder::new("192.168.64.5")
///     .username("alice")
///     .password("secret")
///     .command("sudo python3 /tmp/mininet-script.py /tmp/input-topo.json")
///     .mode(Mode::Automated)
///     .deadline(Duration::from_secs(300))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<Credential>,
    private_key: Option<(PathBuf, Option<Credential>)>,
    command: Option<String>,
    mode: Mode,
    sub_repl: Option<SubRepl>,
    logout_command: String,
    timeout: Duration,
    deadline: Duration,
    timing: Timing,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    benign_exit_codes: Vec<u32>,
}

impl SessionBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: None,
            password: None,
            private_key: None,
            command: None,
            mode: Mode::Automated,
            sub_repl: Some(SubRepl::default()),
            logout_command: "exit".to_string(),
            timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(120),
            timing: Timing::default(),
            terminal_width: 120,
            terminal_height: 40,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            benign_exit_codes: vec![130],
        }
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password, used both for SSH login and privilege escalation.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Credential::new(password));
        self
    }

    /// Set the password from an existing credential handle.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.password = Some(credential);
        self
    }

    /// Log in with a private key instead of the password.
    ///
    /// A password is still required for escalation.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.private_key = Some((key_path.into(), None));
        self
    }

    /// Log in with an encrypted private key.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.private_key = Some((key_path.into(), Some(Credential::new(passphrase))));
        self
    }

    /// Set the privileged command to run.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set automated or interactive mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Describe the remote program's REPL.
    pub fn sub_repl(mut self, banner: impl Into<String>, exit_command: impl Into<String>) -> Self {
        self.sub_repl = Some(SubRepl {
            banner: banner.into(),
            exit_command: exit_command.into(),
        });
        self
    }

    /// The remote program has no REPL of its own.
    pub fn without_sub_repl(mut self) -> Self {
        self.sub_repl = None;
        self
    }

    /// Set the command that ends the login shell (default: `exit`).
    pub fn logout_command(mut self, command: impl Into<String>) -> Self {
        self.logout_command = command.into();
        self
    }

    /// Set the connection timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the overall session deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Override delays and thresholds.
    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Set host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Accept any host key. For lab VMs only.
    pub fn danger_disable_host_key_verification(mut self) -> Self {
        self.host_key_verification = HostKeyVerification::Disabled;
        self
    }

    /// Use a custom known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set the remote exit statuses treated as a normal end.
    pub fn benign_exit_codes(mut self, codes: impl Into<Vec<u32>>) -> Self {
        self.benign_exit_codes = codes.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<SessionConfig> {
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| invalid("username is required"))?;

        let credential = self
            .password
            .filter(|c| !c.is_empty())
            .ok_or_else(|| invalid("a password is required for privilege escalation"))?;

        let command = self
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| invalid("a remote command is required"))?;

        if self.host.is_empty() {
            return Err(invalid("host is required"));
        }

        let now = Instant::now();
        let durations = [
            ("timeout", self.timeout),
            ("deadline", self.deadline),
            ("shell_ready", self.timing.shell_ready),
            ("grace", self.timing.grace),
            ("settle", self.timing.settle),
            ("quiet_threshold", self.timing.quiet_threshold),
            ("quiet_rearm", self.timing.quiet_rearm),
            ("partial_flush", self.timing.partial_flush),
            ("drain", self.timing.drain),
        ];
        for (name, value) in durations {
            if now.checked_add(value).is_none() {
                return Err(invalid(format!("{} of {:?} is out of range", name, value)));
            }
        }

        let auth = match self.private_key {
            Some((path, passphrase)) => AuthMethod::PrivateKey { path, passphrase },
            None => AuthMethod::Password(credential.clone()),
        };

        let ssh = SshConfig {
            host: self.host,
            port: self.port,
            username,
            auth,
            timeout: self.timeout,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        };

        Ok(SessionConfig {
            ssh,
            credential,
            command,
            mode: self.mode,
            sub_repl: self.sub_repl,
            logout_command: self.logout_command,
            deadline: self.deadline,
            timing: self.timing,
            benign_exit_codes: self.benign_exit_codes,
        })
    }
}

fn invalid(message: impl Into<String>) -> crate::error::Error {
    DriverError::InvalidConfig {
        message: message.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn base() -> SessionBuilder {
        SessionBuilder::new("10.0.0.5")
            .username("alice")
            .password("pw")
            .command("sudo true")
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.mode, Mode::Automated);
        assert_eq!(config.deadline, Duration::from_secs(120));
        assert_eq!(config.benign_exit_codes, vec![130]);
        assert_eq!(config.sub_repl, Some(SubRepl::default()));
        assert!(matches!(config.ssh.auth, AuthMethod::Password(_)));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = SessionBuilder::new("h").password("pw").command("x").build().unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::InvalidConfig { .. })));

        let err = SessionBuilder::new("h").username("u").command("x").build().unwrap_err();
        assert!(err.to_string().contains("password"));

        let err = SessionBuilder::new("h").username("u").password("pw").build().unwrap_err();
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_error_never_contains_secret() {
        let err = SessionBuilder::new("h")
            .username("u")
            .password("topsecret")
            .build()
            .unwrap_err();
        assert!(!err.to_string().contains("topsecret"));
    }

    #[test]
    fn test_private_key_keeps_escalation_password() {
        let config = base().private_key("/home/alice/.ssh/id_ed25519").build().unwrap();
        assert!(matches!(config.ssh.auth, AuthMethod::PrivateKey { .. }));
        assert!(!config.credential.is_empty());
    }

    #[test]
    fn test_unbounded_durations_rejected() {
        let err = base().deadline(Duration::MAX).build().unwrap_err();
        assert!(matches!(err, Error::Driver(DriverError::InvalidConfig { .. })));
        assert!(err.to_string().contains("deadline"));

        let timing = Timing {
            quiet_rearm: Duration::MAX,
            ..Timing::default()
        };
        let err = base().timing(timing).build().unwrap_err();
        assert!(err.to_string().contains("quiet_rearm"));

        assert!(base().deadline(Duration::from_secs(3600)).build().is_ok());
    }

    #[test]
    fn test_without_sub_repl() {
        let config = base().without_sub_repl().build().unwrap();
        assert!(config.sub_repl.is_none());
        assert_eq!(config.exit_keyword(), "exit");
        assert!(config.classifier().banner.is_none());
    }
}
