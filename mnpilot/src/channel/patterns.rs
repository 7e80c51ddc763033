//! Line matchers and the static rule table used by the classifier.

use regex::Regex;

use super::classifier::SignalKind;
use crate::driver::Phase;

/// Trait for line matching - regex by default, extensible for hand-written checks.
pub trait LineMatcher: Send + Sync {
    /// Check if the line matches.
    fn is_match(&self, line: &str) -> bool;
}

/// Regex-based line matcher (the default implementation).
impl LineMatcher for Regex {
    fn is_match(&self, line: &str) -> bool {
        Regex::is_match(self, line)
    }
}

/// Matches a privilege-escalation password request.
///
/// A line qualifies if it mentions "password" (any case) and either
/// mentions "sudo" or starts with the literal `[sudo]` token, or if it ends
/// in `:` once trailing whitespace is removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationPrompt;

impl LineMatcher for EscalationPrompt {
    fn is_match(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        if !lower.contains("password") {
            return false;
        }
        lower.contains("sudo")
            || line.trim_start().starts_with("[sudo]")
            || line.trim_end().ends_with(':')
    }
}

/// Matches a line that equals a fixed text once surrounding whitespace is trimmed.
#[derive(Debug, Clone)]
pub struct ExactLine(pub String);

impl LineMatcher for ExactLine {
    fn is_match(&self, line: &str) -> bool {
        line.trim() == self.0
    }
}

/// Matches a line that starts with a fixed text.
#[derive(Debug, Clone)]
pub struct LinePrefix(pub String);

impl LineMatcher for LinePrefix {
    fn is_match(&self, line: &str) -> bool {
        line.trim_start().starts_with(&self.0)
    }
}

/// When a rule is allowed to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGate {
    /// In any phase.
    Always,

    /// Only while the driver is in one of these phases.
    Phases(&'static [Phase]),

    /// Only after the sub-REPL has been entered.
    AfterSubsession,
}

/// A classification rule: a matcher and the signal it emits.
pub struct ClassifierRule {
    /// Short rule name, used in logs.
    pub name: &'static str,

    /// Kind of signal emitted on match.
    pub kind: SignalKind,

    /// Line matcher.
    pub matcher: Box<dyn LineMatcher>,

    /// Phase gating.
    pub gate: RuleGate,
}

impl ClassifierRule {
    /// Create a rule that can fire in any phase.
    pub fn new(name: &'static str, kind: SignalKind, matcher: impl LineMatcher + 'static) -> Self {
        Self {
            name,
            kind,
            matcher: Box::new(matcher),
            gate: RuleGate::Always,
        }
    }

    /// Restrict when the rule can fire.
    pub fn with_gate(mut self, gate: RuleGate) -> Self {
        self.gate = gate;
        self
    }
}

impl std::fmt::Debug for ClassifierRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("gate", &self.gate)
            .finish()
    }
}

/// Phases in which a bare shell prompt means the simulator has exited.
const SHELL_RETURN_PHASES: &[Phase] = &[Phase::Executing, Phase::InteractiveHandoff];

/// Build the priority-ordered rule table.
///
/// `banner` is the sub-REPL ready prompt (e.g. `mininet>`), if the remote
/// program starts one.
pub fn default_rules(banner: Option<&str>) -> Vec<ClassifierRule> {
    let mut rules = vec![ClassifierRule::new(
        "escalation-prompt",
        SignalKind::CredentialPrompt,
        EscalationPrompt,
    )];

    if let Some(banner) = banner {
        rules.push(ClassifierRule::new(
            "subsession-banner",
            SignalKind::SubsessionEntered,
            ExactLine(banner.to_string()),
        ));
        rules.push(ClassifierRule::new(
            "subsession-starting",
            SignalKind::SubsessionEntered,
            LinePrefix("*** Starting CLI:".to_string()),
        ));
    }

    rules.extend([
        ClassifierRule::new(
            "completed-in",
            SignalKind::TaskComplete,
            compile(r"completed in \d+(\.\d+)? seconds"),
        ),
        ClassifierRule::new(
            "done-marker",
            SignalKind::TaskComplete,
            LinePrefix("*** Done".to_string()),
        ),
        ClassifierRule::new(
            "stopping-marker",
            SignalKind::TaskComplete,
            LinePrefix("*** Stopping".to_string()),
        )
        .with_gate(RuleGate::AfterSubsession),
        ClassifierRule::new("shell-return", SignalKind::TaskComplete, compile(r"[$#]\s*$"))
            .with_gate(RuleGate::Phases(SHELL_RETURN_PHASES)),
    ]);

    rules
}

fn compile(pattern: &str) -> Regex {
    // Patterns are literals in this module; a failure is a programming error
    // caught by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}
