// src/recovery/classifier.rs
//! Failure classification
//!
//! Maps a raw execution failure into the closed `ErrorKind` taxonomy that
//! drives retry decisions. Raised interpreter errors are matched against an
//! ordered rule table, first match wins; more specific kinds sit above the
//! `RuntimeData` fallback so a dependency failure that also looks like a
//! runtime error classifies as `MissingDependency`.

use serde::{Deserialize, Serialize};

/// Retry-policy-relevant failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed code (e.g. from generation)
    Syntax,
    /// Import/module resolution failure
    MissingDependency,
    /// Type/value/data errors during execution
    RuntimeData,
    /// Memory/CPU limit breach
    ResourceExceeded,
    /// Exceeded the attempt's wall-clock budget
    Timeout,
    /// Pool/provisioning/transport failure, not attributable to task code
    Infrastructure,
    /// Cut short by the cycle deadline or caller cancellation
    CycleDeadline,
}

/// What the job should do about a failure of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Request a repair candidate, then retry
    RepairAndRetry,
    /// Retry once with the same code (assume transient), else terminal
    RetryOnce,
    /// Terminal failure, no retry
    Terminal,
}

impl ErrorKind {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ErrorKind::Syntax | ErrorKind::MissingDependency | ErrorKind::RuntimeData => {
                RetryPolicy::RepairAndRetry
            }
            ErrorKind::Timeout => RetryPolicy::RetryOnce,
            ErrorKind::ResourceExceeded | ErrorKind::Infrastructure | ErrorKind::CycleDeadline => {
                RetryPolicy::Terminal
            }
        }
    }

    /// Whether a failure of this kind leaves the session in a state that must
    /// not be reused (interrupted mid-execution, killed, or never reached).
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ResourceExceeded
                | ErrorKind::Infrastructure
                | ErrorKind::CycleDeadline
        )
    }

    /// Stable snake_case name used in telemetry labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::MissingDependency => "missing_dependency",
            ErrorKind::RuntimeData => "runtime_data",
            ErrorKind::ResourceExceeded => "resource_exceeded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::CycleDeadline => "cycle_deadline_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule: matches on the raised error's type name or on
/// message substrings.
struct Rule {
    kind: ErrorKind,
    enames: &'static [&'static str],
    message_parts: &'static [&'static str],
}

/// Ordered rule table, first match wins. Covers both interpreters' error
/// vocabularies. `MissingDependency` sits above `Syntax` so an import that
/// fails to resolve never degrades into a less actionable kind.
const RULES: &[Rule] = &[
    Rule {
        kind: ErrorKind::MissingDependency,
        enames: &["ModuleNotFoundError", "ImportError"],
        message_parts: &["Cannot find module", "MODULE_NOT_FOUND"],
    },
    Rule {
        kind: ErrorKind::Syntax,
        enames: &["SyntaxError", "IndentationError", "TabError"],
        message_parts: &["Unexpected token", "Unexpected end of input"],
    },
    Rule {
        kind: ErrorKind::ResourceExceeded,
        enames: &["MemoryError", "ProcessKilled"],
        message_parts: &["heap out of memory", "ENOMEM", "Cannot allocate memory"],
    },
    Rule {
        kind: ErrorKind::Timeout,
        enames: &["KeyboardInterrupt"],
        message_parts: &[],
    },
];

/// Classify a raised interpreter error. Total: anything unmatched is a
/// `RuntimeData` failure, the repairable default for code that ran and broke.
pub fn classify_raised(ename: &str, message: &str) -> ErrorKind {
    for rule in RULES {
        if rule.enames.iter().any(|e| *e == ename)
            || rule.message_parts.iter().any(|p| message.contains(p))
        {
            return rule.kind;
        }
    }
    ErrorKind::RuntimeData
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_python_vocabulary() {
        assert_eq!(
            classify_raised("ModuleNotFoundError", "No module named 'scipy'"),
            ErrorKind::MissingDependency
        );
        assert_eq!(
            classify_raised("SyntaxError", "invalid syntax"),
            ErrorKind::Syntax
        );
        assert_eq!(classify_raised("MemoryError", ""), ErrorKind::ResourceExceeded);
        assert_eq!(
            classify_raised("TypeError", "unsupported operand"),
            ErrorKind::RuntimeData
        );
        assert_eq!(classify_raised("KeyboardInterrupt", ""), ErrorKind::Timeout);
    }

    #[test]
    fn test_node_vocabulary() {
        assert_eq!(
            classify_raised("Error", "Cannot find module 'lodash'"),
            ErrorKind::MissingDependency
        );
        assert_eq!(
            classify_raised("SyntaxError", "Unexpected token ')'"),
            ErrorKind::Syntax
        );
        assert_eq!(
            classify_raised("RangeError", "Array buffer allocation failed: heap out of memory"),
            ErrorKind::ResourceExceeded
        );
        assert_eq!(
            classify_raised("ReferenceError", "x is not defined"),
            ErrorKind::RuntimeData
        );
    }

    #[test]
    fn test_specific_kind_wins_over_runtime() {
        // A dependency failure that manifests with a runtime-looking message
        // still classifies as the more specific kind.
        assert_eq!(
            classify_raised("ImportError", "cannot import name 'fit' (TypeError nearby)"),
            ErrorKind::MissingDependency
        );
    }

    #[test]
    fn test_killed_interpreter_is_resource_exceeded() {
        assert_eq!(
            classify_raised("ProcessKilled", "interpreter terminated by SIGKILL"),
            ErrorKind::ResourceExceeded
        );
    }

    #[test]
    fn test_retry_policies_match_taxonomy() {
        assert_eq!(ErrorKind::Syntax.retry_policy(), RetryPolicy::RepairAndRetry);
        assert_eq!(
            ErrorKind::MissingDependency.retry_policy(),
            RetryPolicy::RepairAndRetry
        );
        assert_eq!(ErrorKind::RuntimeData.retry_policy(), RetryPolicy::RepairAndRetry);
        assert_eq!(ErrorKind::ResourceExceeded.retry_policy(), RetryPolicy::Terminal);
        assert_eq!(ErrorKind::Timeout.retry_policy(), RetryPolicy::RetryOnce);
        assert_eq!(ErrorKind::Infrastructure.retry_policy(), RetryPolicy::Terminal);
        assert_eq!(ErrorKind::CycleDeadline.retry_policy(), RetryPolicy::Terminal);
    }

    proptest! {
        // Classification is total and deterministic for arbitrary error text
        #[test]
        fn prop_classify_total_and_deterministic(ename in ".{0,40}", message in ".{0,120}") {
            let first = classify_raised(&ename, &message);
            let second = classify_raised(&ename, &message);
            prop_assert_eq!(first, second);
        }

        // An exact ename hit always beats the fallback, whatever the message
        #[test]
        fn prop_ename_match_beats_fallback(message in ".{0,120}") {
            prop_assert_eq!(
                classify_raised("ModuleNotFoundError", &message),
                ErrorKind::MissingDependency
            );
        }
    }
}
