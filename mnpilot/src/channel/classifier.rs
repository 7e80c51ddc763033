//! Line classification.
//!
//! Turns one line of remote output into zero or more [`Signal`]s by running
//! the priority-ordered rule table. Each signal kind fires at most once per
//! session: once the credential prompt has been reported, the same text
//! showing up again (an echo, a retry banner) is only logged. A quiet-period
//! fallback covers prompts that never produce a recognizable line.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use super::patterns::{ClassifierRule, RuleGate, default_rules};
use crate::driver::Phase;

/// What a line (or a silence) was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// The remote is asking for the escalation password.
    CredentialPrompt,

    /// The simulator's own REPL is up.
    SubsessionEntered,

    /// The simulation finished or control returned to the OS shell.
    TaskComplete,
}

impl SignalKind {
    const ALL: [SignalKind; 3] = [
        SignalKind::CredentialPrompt,
        SignalKind::SubsessionEntered,
        SignalKind::TaskComplete,
    ];

    fn index(self) -> usize {
        match self {
            SignalKind::CredentialPrompt => 0,
            SignalKind::SubsessionEntered => 1,
            SignalKind::TaskComplete => 2,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::CredentialPrompt => "credential prompt",
            SignalKind::SubsessionEntered => "sub-session entered",
            SignalKind::TaskComplete => "task complete",
        };
        f.write_str(name)
    }
}

/// A classified event. Produced once, consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// What was recognized.
    pub kind: SignalKind,

    /// The (already masked) line that triggered it; empty when synthesized.
    pub line: String,

    /// When it was recognized.
    pub at: Instant,

    /// Whether it came from the quiet-period fallback rather than a line.
    pub synthesized: bool,
}

/// Silence tracking for prompts that print no recognizable line.
#[derive(Debug, Clone)]
pub struct QuietPeriod {
    last_activity: Instant,
    next_check: Instant,
    threshold: Duration,
    rearm: Duration,
}

impl QuietPeriod {
    /// Start tracking at `now`.
    pub fn new(now: Instant, threshold: Duration, rearm: Duration) -> Self {
        Self {
            last_activity: now,
            next_check: now + rearm,
            threshold,
            rearm,
        }
    }

    /// Record output at `now` and push the next check out.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.next_check = now + self.rearm;
    }

    /// Schedule the next check one re-arm interval after `now`.
    pub fn rearm(&mut self, now: Instant) {
        self.next_check = now + self.rearm;
    }

    /// True once strictly more than the threshold has passed without output.
    pub fn is_quiet(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > self.threshold
    }

    /// When the reader should next evaluate the fallback.
    pub fn next_check(&self) -> Instant {
        self.next_check
    }

    /// Time of the last output.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

/// Classifier settings taken from the session configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Sub-REPL ready banner, if the remote program has one.
    pub banner: Option<String>,

    /// Silence needed before a credential prompt is assumed.
    pub quiet_threshold: Duration,

    /// How often the silence is re-evaluated.
    pub quiet_rearm: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            banner: None,
            quiet_threshold: Duration::from_secs(2),
            quiet_rearm: Duration::from_secs(3),
        }
    }
}

/// Applies the rule table to lines, enforcing at-most-once per kind.
pub struct LineClassifier {
    rules: Vec<ClassifierRule>,
    fired: [bool; 3],
    quiet: QuietPeriod,
}

impl LineClassifier {
    /// Create a classifier with the default rule table.
    pub fn new(config: &ClassifierConfig, now: Instant) -> Self {
        Self::with_rules(default_rules(config.banner.as_deref()), config, now)
    }

    /// Create a classifier with a custom rule table.
    pub fn with_rules(rules: Vec<ClassifierRule>, config: &ClassifierConfig, now: Instant) -> Self {
        Self {
            rules,
            fired: [false; 3],
            quiet: QuietPeriod::new(now, config.quiet_threshold, config.quiet_rearm),
        }
    }

    /// Classify one line received at `now` while the driver is in `phase`.
    ///
    /// Signals come back in rule priority order, at most one per kind.
    pub fn classify(&mut self, line: &str, phase: Phase, now: Instant) -> Vec<Signal> {
        self.quiet.touch(now);

        let mut matched = [false; 3];
        for rule in &self.rules {
            let idx = rule.kind.index();
            if matched[idx] || !self.gate_open(rule.gate, phase) {
                continue;
            }
            if !rule.matcher.is_match(line) {
                continue;
            }
            if self.fired[idx] {
                if rule.kind == SignalKind::CredentialPrompt {
                    warn!(
                        "credential prompt pattern seen again in {}; not re-submitting",
                        phase
                    );
                }
                continue;
            }
            debug!("rule '{}' matched: {}", rule.name, rule.kind);
            matched[idx] = true;
        }

        let signals: Vec<Signal> = SignalKind::ALL
            .iter()
            .filter(|kind| matched[kind.index()])
            .map(|&kind| {
                self.fired[kind.index()] = true;
                Signal {
                    kind,
                    line: line.to_string(),
                    at: now,
                    synthesized: false,
                }
            })
            .collect();

        if signals.len() > 1 {
            warn!(
                "classification ambiguity: line matched {:?}; handling in priority order",
                signals.iter().map(|s| s.kind).collect::<Vec<_>>()
            );
        }

        signals
    }

    /// Evaluate the quiet-period fallback at `now`.
    ///
    /// Synthesizes a credential prompt if none has fired yet, the driver is
    /// waiting for one, and the line stream has been silent for longer than
    /// the threshold. Re-arms the check either way.
    pub fn check_quiet(&mut self, phase: Phase, now: Instant) -> Option<Signal> {
        let idx = SignalKind::CredentialPrompt.index();
        let fire =
            !self.fired[idx] && phase == Phase::AwaitingEscalation && self.quiet.is_quiet(now);
        self.quiet.rearm(now);

        if !fire {
            return None;
        }

        debug!(
            "no output for {:?}; assuming a hidden credential prompt",
            now.saturating_duration_since(self.quiet.last_activity())
        );
        self.fired[idx] = true;
        Some(Signal {
            kind: SignalKind::CredentialPrompt,
            line: String::new(),
            at: now,
            synthesized: true,
        })
    }

    /// Record non-line activity (e.g. a partial line) at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.quiet.touch(now);
    }

    /// When the quiet-period check should next run.
    pub fn next_quiet_check(&self) -> Instant {
        self.quiet.next_check()
    }

    /// Whether a kind has already fired this session.
    pub fn has_fired(&self, kind: SignalKind) -> bool {
        self.fired[kind.index()]
    }

    fn gate_open(&self, gate: RuleGate, phase: Phase) -> bool {
        match gate {
            RuleGate::Always => true,
            RuleGate::Phases(phases) => phases.contains(&phase),
            RuleGate::AfterSubsession => self.fired[SignalKind::SubsessionEntered.index()],
        }
    }
}
