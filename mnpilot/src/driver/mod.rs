//! Session driver.
//!
//! The driver layer owns the phase state machine that types the privileged
//! command, answers the escalation prompt, leaves or hands over the
//! simulator's REPL and logs out, plus the relay tasks that feed it.

mod builder;
mod config;
mod console;
mod phase;
mod relay;
mod report;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::SessionBuilder;
pub use config::{Mode, SessionConfig, SubRepl, Timing};
pub use console::{CaptureConsole, Console, StdoutConsole};
pub use phase::Phase;
pub use report::{SessionReport, TerminationReason};
pub use session::{CancelHandle, OperatorInput, Session};
