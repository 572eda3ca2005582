//! Post-apply checks. The first failing check decides the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::detector::IssueDetector;
use super::executor::tail;
use super::types::{FixError, FixResult, FixStrategy, Issue, TestRun};
use crate::config::AutoFixConfig;

pub const CHANGES_NOT_APPLIED: &str = "changes_not_applied";
pub const TESTS_FAILED: &str = "tests_failed";
pub const ISSUE_STILL_PRESENT: &str = "issue_still_present";
pub const VALIDATION_TIMEOUT: &str = "validation_timeout";
pub const NO_TEST_RUNNER: &str = "no_test_runner";

/// Collaborator seam for the project's test suite.
#[async_trait::async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, issue: &Issue) -> Vec<TestRun>;
}

/// Collaborator seam for re-detection. `None` means "cannot tell".
#[async_trait::async_trait]
pub trait Redetector: Send + Sync {
    async fn still_present(&self, issue: &Issue, timeout: Duration) -> Option<bool>;
}

#[async_trait::async_trait]
impl Redetector for IssueDetector {
    async fn still_present(&self, issue: &Issue, timeout: Duration) -> Option<bool> {
        self.reproduces(issue, timeout).await
    }
}

/// Runs one shell command; exit status 0 is a pass.
pub struct CommandTestRunner {
    command: String,
    workdir: std::path::PathBuf,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>, workdir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait::async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, _issue: &Issue) -> Vec<TestRun> {
        let started = Instant::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let run = match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                TestRun {
                    name: self.command.clone(),
                    passed: out.status.success(),
                    duration_ms,
                    output: Some(tail(&text)),
                }
            }
            Err(e) => {
                tracing::error!(command = %self.command, error = %e, "Failed to spawn test command");
                TestRun {
                    name: self.command.clone(),
                    passed: false,
                    duration_ms,
                    output: Some(e.to_string()),
                }
            }
        };
        vec![run]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub success: bool,
    pub error: Option<FixError>,
    pub tests_run: Vec<TestRun>,
}

impl ValidationOutcome {
    fn pass(tests_run: Vec<TestRun>) -> Self {
        Self {
            success: true,
            error: None,
            tests_run,
        }
    }

    fn fail(code: &str, message: impl Into<String>, recoverable: bool, tests_run: Vec<TestRun>) -> Self {
        Self {
            success: false,
            error: Some(FixError::new(code, message, recoverable)),
            tests_run,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::fail(
            VALIDATION_TIMEOUT,
            format!("validation did not finish within {} ms", after.as_millis()),
            true,
            Vec::new(),
        )
    }
}

pub struct FixValidator {
    tests: Option<Arc<dyn TestRunner>>,
    redetector: Option<Arc<dyn Redetector>>,
}

impl FixValidator {
    pub fn new(tests: Option<Arc<dyn TestRunner>>, redetector: Option<Arc<dyn Redetector>>) -> Self {
        Self { tests, redetector }
    }

    /// Applied changes, then tests (when required), then re-detection.
    pub async fn validate_fix(
        &self,
        result: &FixResult,
        strategy: &FixStrategy,
        issue: &Issue,
        config: &AutoFixConfig,
    ) -> ValidationOutcome {
        let applied_steps = result
            .changes
            .iter()
            .map(|c| c.step_index)
            .collect::<std::collections::BTreeSet<_>>();
        if applied_steps.len() < strategy.steps.len() {
            return ValidationOutcome::fail(
                CHANGES_NOT_APPLIED,
                format!(
                    "{} of {} steps reported a change",
                    applied_steps.len(),
                    strategy.steps.len()
                ),
                true,
                Vec::new(),
            );
        }

        let mut tests_run = Vec::new();
        if config.test_validation_required {
            let Some(runner) = &self.tests else {
                return ValidationOutcome::fail(
                    NO_TEST_RUNNER,
                    "test validation is required but no test runner is configured",
                    false,
                    tests_run,
                );
            };
            tests_run = runner.run_tests(issue).await;
            let failed: Vec<&str> = tests_run
                .iter()
                .filter(|t| !t.passed)
                .map(|t| t.name.as_str())
                .collect();
            if !failed.is_empty() {
                let message = format!("failing: {}", failed.join(", "));
                return ValidationOutcome::fail(TESTS_FAILED, message, true, tests_run);
            }
        }

        if let Some(redetector) = &self.redetector {
            if redetector
                .still_present(issue, config.timeouts.detection())
                .await
                == Some(true)
            {
                return ValidationOutcome::fail(
                    ISSUE_STILL_PRESENT,
                    format!("{} is still reported after the fix", issue.id),
                    true,
                    tests_run,
                );
            }
        }

        tracing::debug!(issue_id = %issue.id, tests = tests_run.len(), "Fix validated");
        ValidationOutcome::pass(tests_run)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::analyzer::tests::issue;
    use crate::engine::types::{AppliedChange, FixStep, IssueType, RiskLevel, StepAction};

    pub(crate) struct FixedTests(pub bool);

    #[async_trait::async_trait]
    impl TestRunner for FixedTests {
        async fn run_tests(&self, _issue: &Issue) -> Vec<TestRun> {
            vec![TestRun {
                name: "unit".into(),
                passed: self.0,
                duration_ms: 1,
                output: None,
            }]
        }
    }

    pub(crate) struct FixedRedetect(pub Option<bool>);

    #[async_trait::async_trait]
    impl Redetector for FixedRedetect {
        async fn still_present(&self, _issue: &Issue, _timeout: Duration) -> Option<bool> {
            self.0
        }
    }

    fn strategy(steps: usize) -> FixStrategy {
        FixStrategy {
            id: "t:iss".into(),
            template_id: "t".into(),
            name: "t".into(),
            description: String::new(),
            applicable_types: vec![IssueType::Lint],
            steps: (0..steps).map(|_| FixStep::command("true")).collect(),
            risk_level: RiskLevel::Low,
            confidence: 0.9,
            estimated_time_ms: 1,
            prerequisites: vec![],
            rollback_steps: vec![],
            success_criteria: vec![],
            tags: Default::default(),
        }
    }

    fn applied(issue: &Issue, strategy: &FixStrategy, changes: usize) -> FixResult {
        let mut r = FixResult::pending(issue, strategy, None, 1);
        r.changes = (0..changes)
            .map(|i| AppliedChange {
                step_index: i,
                action: StepAction::RunCommand,
                target: "true".into(),
                summary: "ran".into(),
                backup: None,
            })
            .collect();
        r
    }

    #[tokio::test]
    async fn test_missing_changes_fail_first() {
        let i = issue(IssueType::Lint, "x", serde_json::json!({}));
        let s = strategy(2);
        let v = FixValidator::new(Some(Arc::new(FixedTests(false))), None);
        let out = v.validate_fix(&applied(&i, &s, 1), &s, &i, &AutoFixConfig::default()).await;
        assert_eq!(out.error.unwrap().code, CHANGES_NOT_APPLIED);
        assert!(out.tests_run.is_empty());
    }

    #[tokio::test]
    async fn test_failing_tests_reported() {
        let i = issue(IssueType::Lint, "x", serde_json::json!({}));
        let s = strategy(1);
        let v = FixValidator::new(Some(Arc::new(FixedTests(false))), Some(Arc::new(FixedRedetect(Some(false)))));
        let out = v.validate_fix(&applied(&i, &s, 1), &s, &i, &AutoFixConfig::default()).await;
        assert!(!out.success);
        assert_eq!(out.error.unwrap().code, TESTS_FAILED);
        assert_eq!(out.tests_run.len(), 1);
    }

    #[tokio::test]
    async fn test_required_tests_without_runner_fail() {
        let i = issue(IssueType::Lint, "x", serde_json::json!({}));
        let s = strategy(1);
        let v = FixValidator::new(None, None);
        let out = v.validate_fix(&applied(&i, &s, 1), &s, &i, &AutoFixConfig::default()).await;
        let err = out.error.unwrap();
        assert_eq!(err.code, NO_TEST_RUNNER);
        assert!(!err.recoverable);

        let relaxed = AutoFixConfig {
            test_validation_required: false,
            ..Default::default()
        };
        assert!(v.validate_fix(&applied(&i, &s, 1), &s, &i, &relaxed).await.success);
    }

    #[tokio::test]
    async fn test_redetection_decides_last() {
        let i = issue(IssueType::Lint, "x", serde_json::json!({}));
        let s = strategy(1);
        let still = FixValidator::new(Some(Arc::new(FixedTests(true))), Some(Arc::new(FixedRedetect(Some(true)))));
        let out = still.validate_fix(&applied(&i, &s, 1), &s, &i, &AutoFixConfig::default()).await;
        assert_eq!(out.error.unwrap().code, ISSUE_STILL_PRESENT);

        let unknown = FixValidator::new(Some(Arc::new(FixedTests(true))), Some(Arc::new(FixedRedetect(None))));
        let out = unknown.validate_fix(&applied(&i, &s, 1), &s, &i, &AutoFixConfig::default()).await;
        assert!(out.success);
        assert_eq!(out.tests_run.len(), 1);
    }

    #[tokio::test]
    async fn test_command_runner_uses_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let i = issue(IssueType::Test, "x", serde_json::json!({}));
        let pass = CommandTestRunner::new("echo all good", dir.path()).run_tests(&i).await;
        assert!(pass[0].passed);
        assert!(pass[0].output.as_deref().unwrap_or_default().contains("all good"));
        let fail = CommandTestRunner::new("exit 1", dir.path()).run_tests(&i).await;
        assert!(!fail[0].passed);
    }
}
