//! Admission check for the pending -> applying transition.

use std::fmt;

use super::types::{FixStrategy, Issue, Severity};
use crate::config::AutoFixConfig;

/// One unmet condition. All of them are reported, not just the first.
#[derive(Debug, Clone, PartialEq)]
pub enum GateViolation {
    Disabled,
    IssueTypeDisabled,
    AutoFixDisabledForType,
    CriticalSeverity,
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },
    RiskAboveTolerance,
    ConcurrencyLimit { applying: usize, max: usize },
}

impl fmt::Display for GateViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateViolation::Disabled => f.write_str("auto-fix is disabled"),
            GateViolation::IssueTypeDisabled => f.write_str("issue type is not enabled"),
            GateViolation::AutoFixDisabledForType => {
                f.write_str("auto-fix is disabled for this issue type")
            }
            GateViolation::CriticalSeverity => {
                f.write_str("critical issues always require approval")
            }
            GateViolation::ConfidenceBelowThreshold {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} is below threshold {threshold:.2}"),
            GateViolation::RiskAboveTolerance => f.write_str("risk level exceeds risk tolerance"),
            GateViolation::ConcurrencyLimit { applying, max } => {
                write!(f, "{applying} of {max} concurrent fixes already applying")
            }
        }
    }
}

/// Empty result means the strategy may be applied automatically.
pub fn admission_check(
    issue: &Issue,
    strategy: &FixStrategy,
    config: &AutoFixConfig,
    applying_now: usize,
) -> Vec<GateViolation> {
    let mut violations = Vec::new();

    if !config.enabled {
        violations.push(GateViolation::Disabled);
    }
    if !config.is_type_enabled(issue.issue_type) {
        violations.push(GateViolation::IssueTypeDisabled);
    }
    if !config.auto_fix_enabled(issue.issue_type) {
        violations.push(GateViolation::AutoFixDisabledForType);
    }
    if issue.severity == Severity::Critical {
        violations.push(GateViolation::CriticalSeverity);
    }

    let threshold = config.effective_threshold(issue.issue_type);
    // NaN never passes
    if !(strategy.confidence >= threshold) {
        violations.push(GateViolation::ConfidenceBelowThreshold {
            confidence: strategy.confidence,
            threshold,
        });
    }
    if strategy.risk_level > config.risk_tolerance {
        violations.push(GateViolation::RiskAboveTolerance);
    }
    if applying_now >= config.max_concurrent_fixes {
        violations.push(GateViolation::ConcurrencyLimit {
            applying: applying_now,
            max: config.max_concurrent_fixes,
        });
    }
    violations
}
