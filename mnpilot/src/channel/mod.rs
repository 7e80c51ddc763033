//! Channel layer: turning raw shell output into classified signals.
//!
//! This module handles line assembly (with ANSI stripping) and the
//! rule-based recognition of prompts in an unstructured text stream.

mod buffer;
mod classifier;
mod patterns;

pub use buffer::LineBuffer;
pub use classifier::{ClassifierConfig, LineClassifier, QuietPeriod, Signal, SignalKind};
pub use patterns::{
    ClassifierRule, EscalationPrompt, ExactLine, LineMatcher, LinePrefix, RuleGate, default_rules,
};
