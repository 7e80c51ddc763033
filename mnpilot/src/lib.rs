//! # mnpilot
//!
//! Async driver for running a privileged network simulation on a remote
//! host over SSH.
//!
//! mnpilot opens an SSH session, types a `sudo` command into a PTY shell,
//! answers the password prompt (including prompts with no trailing newline
//! or no visible output at all), then either leaves the simulator's REPL
//! and waits for it to finish or hands the REPL to the local operator.
//! Every line the remote prints is echoed locally with the password masked.
//!
//! ## Features
//!
//! - Async SSH connections via russh
//! - Forward-only phase state machine with an overall deadline
//! - Line classification with phase gating and a quiet-period fallback
//! - Artifact upload and timestamped result retrieval
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mnpilot::{Session, SessionBuilder, StdoutConsole};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mnpilot::Error> {
//!     let config = SessionBuilder::new("192.168.64.5")
//!         .username("alice")
//!         .password("secret")
//!         .command("sudo python3 /tmp/mininet-script.py /tmp/input-topo.json")
//!         .build()?;
//!
//!     let session = Session::open(config).await?;
//!     let report = session.run(Arc::new(StdoutConsole), None).await?;
//!     println!("finished: {}", report.reason);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod credential;
pub mod driver;
pub mod error;
pub mod transfer;
pub mod transport;

// Re-export main types for convenience
pub use credential::Credential;
pub use driver::{
    CancelHandle, Console, Mode, Phase, Session, SessionBuilder, SessionConfig, SessionReport,
    StdoutConsole, TerminationReason,
};
pub use error::{Error, SessionError, SessionErrorKind};
pub use transfer::SimulationPlan;
pub use transport::{AuthMethod, SshConfig, SshTransport, Transport};
