//! Outcome of a completed session.

use std::fmt;
use std::time::Duration;

use super::phase::Phase;

/// Why a session ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A task-completion signal was observed.
    TaskComplete,

    /// The operator typed the exit keyword during the handoff.
    OperatorExit,

    /// The local operator interrupted the run.
    Interrupted,

    /// The remote program closed the channel with status 0.
    RemoteExited,

    /// The remote closed with a status listed as benign (e.g. 130).
    BenignInterruptExit,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminationReason::TaskComplete => "task complete",
            TerminationReason::OperatorExit => "operator exit",
            TerminationReason::Interrupted => "interrupted",
            TerminationReason::RemoteExited => "remote exited",
            TerminationReason::BenignInterruptExit => "remote interrupted (benign exit status)",
        };
        f.write_str(text)
    }
}

/// Summary of a session that ended without a fatal error.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session identifier.
    pub id: String,

    /// Every phase the session passed through, in order.
    pub phases: Vec<Phase>,

    /// Why it ended.
    pub reason: TerminationReason,

    /// Remote exit status, if one was reported.
    pub exit_status: Option<u32>,

    /// Number of times the secret was written.
    pub secret_writes: usize,

    /// Wall-clock time from Idle to Closed.
    pub elapsed: Duration,
}

impl SessionReport {
    /// Whether the session passed through `phase`.
    pub fn visited(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }
}
