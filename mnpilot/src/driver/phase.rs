//! Session lifecycle phases.

use std::fmt;

use log::{debug, warn};
use tokio::sync::watch;

/// Position of a session in its lifecycle. Progress is forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Transport up, nothing written yet.
    Idle,
    /// Privileged command sent, waiting for the password prompt.
    AwaitingEscalation,
    /// Secret written (or escalation was not requested).
    Authenticated,
    /// Simulation running unattended.
    Executing,
    /// The operator is typing into the simulator's REPL.
    InteractiveHandoff,
    /// The remote program finished and closed the channel on its own.
    AutomatedCompletion,
    /// Logging out and tearing down.
    Terminating,
    /// Transport closed. Terminal.
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "Idle",
            Phase::AwaitingEscalation => "AwaitingEscalation",
            Phase::Authenticated => "Authenticated",
            Phase::Executing => "Executing",
            Phase::InteractiveHandoff => "InteractiveHandoff",
            Phase::AutomatedCompletion => "AutomatedCompletion",
            Phase::Terminating => "Terminating",
            Phase::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Records phase transitions and publishes the current phase to the
/// reader task.
pub(crate) struct PhaseTracker {
    current: Phase,
    history: Vec<Phase>,
    tx: watch::Sender<Phase>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Idle);
        Self {
            current: Phase::Idle,
            history: vec![Phase::Idle],
            tx,
        }
    }

    pub(crate) fn current(&self) -> Phase {
        self.current
    }

    /// Subscribe to phase changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }

    /// Move to `next`. Returns false (and changes nothing) for a backward or
    /// repeated transition.
    pub(crate) fn advance(&mut self, next: Phase) -> bool {
        if next <= self.current {
            if next != self.current {
                warn!("ignoring backward phase change {} -> {}", self.current, next);
            }
            return false;
        }
        debug!("phase {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
        self.tx.send_replace(next);
        true
    }

    pub(crate) fn history(&self) -> &[Phase] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let mut phases = PhaseTracker::new();
        assert!(phases.advance(Phase::AwaitingEscalation));
        assert!(phases.advance(Phase::Executing));
        assert!(!phases.advance(Phase::AwaitingEscalation));
        assert!(!phases.advance(Phase::Executing));
        assert_eq!(phases.current(), Phase::Executing);
        assert_eq!(
            phases.history(),
            &[Phase::Idle, Phase::AwaitingEscalation, Phase::Executing]
        );
    }

    #[test]
    fn test_closed_recorded_once() {
        let mut phases = PhaseTracker::new();
        assert!(phases.advance(Phase::Closed));
        assert!(!phases.advance(Phase::Closed));
        assert_eq!(phases.history().iter().filter(|p| **p == Phase::Closed).count(), 1);
    }

    #[test]
    fn test_subscribers_see_latest() {
        let mut phases = PhaseTracker::new();
        let rx = phases.subscribe();
        phases.advance(Phase::Authenticated);
        assert_eq!(*rx.borrow(), Phase::Authenticated);
    }
}
