//! Step execution: the only place fix strategies touch the workspace.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;

use super::types::{AppliedChange, FixStep, StepAction};

const BACKUP_SUFFIX: &str = ".autofix.bak";
/// Marks a file that did not exist before the fix created it.
const ABSENT_SUFFIX: &str = ".autofix.absent";
const OUTPUT_TAIL: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("command `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid step: {0}")]
    InvalidStep(String),
    #[error("action {0} is not supported by this executor")]
    Unsupported(&'static str),
    #[error("fix execution timed out after {0} ms")]
    Timeout(u64),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::CommandFailed { .. } => "command_failed",
            ExecutionError::Spawn { .. } => "spawn_failed",
            ExecutionError::Io { .. } => "io_error",
            ExecutionError::InvalidStep(_) => "invalid_step",
            ExecutionError::Unsupported(_) => "unsupported_action",
            ExecutionError::Timeout(_) => "execution_timeout",
        }
    }

    /// Whether trying again (possibly with another strategy) can help.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ExecutionError::CommandFailed { .. }
                | ExecutionError::Timeout(_)
                | ExecutionError::Io { .. }
                | ExecutionError::InvalidStep(_)
        )
    }
}

/// Collaborator seam for applying fix steps.
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &FixStep, index: usize) -> Result<AppliedChange, ExecutionError>;

    /// Called once a fix is confirmed; drop anything kept only for rollback.
    async fn commit(&self, _changes: &[AppliedChange]) {}

    /// Called when a fix ends unconfirmed, after any rollback. `steps` is the
    /// whole plan, including steps that failed before reporting a change.
    async fn discard(&self, _steps: &[FixStep]) {}
}

/// File a step backs up before touching it, if any.
pub fn backup_target(step: &FixStep) -> Option<&str> {
    match step.action {
        StepAction::RunCommand => step.param_str("backup"),
        StepAction::EditFile | StepAction::UpdateConfig => Some(step.target.as_str()),
        StepAction::RestoreFile => None,
    }
}

/// Last `OUTPUT_TAIL` characters of trimmed process output.
pub(crate) fn tail(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().rev().nth(OUTPUT_TAIL - 1) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExecutionError + '_ {
    move |source| ExecutionError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Set `key` (dotted path) to `value`, creating intermediate objects.
pub fn set_json_path(
    doc: &mut serde_json::Value,
    key: &str,
    value: serde_json::Value,
) -> Result<(), ExecutionError> {
    let mut parts = key.split('.').peekable();
    let mut cursor = doc;
    while let Some(part) = parts.next() {
        let map = cursor
            .as_object_mut()
            .ok_or_else(|| ExecutionError::InvalidStep(format!("'{key}' crosses a non-object value")))?;
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return Ok(());
        }
        cursor = map
            .entry(part.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
    }
    Err(ExecutionError::InvalidStep("empty config key".into()))
}

/// Runs steps against a working directory with `sh -c` and plain file edits.
/// Files are backed up before their first modification so `restore_file`
/// rollback steps can undo them. A backup lives until the fix is committed,
/// restored or discarded; one found on disk without a live fix is stale.
pub struct ShellStepExecutor {
    workdir: PathBuf,
    live_backups: Mutex<HashSet<PathBuf>>,
}

impl ShellStepExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            live_backups: Mutex::new(HashSet::new()),
        }
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.live_backups.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn drop_backup(&self, path: &Path) {
        for suffix in [BACKUP_SUFFIX, ABSENT_SUFFIX] {
            let _ = tokio::fs::remove_file(with_suffix(path, suffix)).await;
        }
        self.live().remove(path);
    }

    fn resolve(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    async fn backup(&self, path: &Path) -> Result<(), ExecutionError> {
        let backup = with_suffix(path, BACKUP_SUFFIX);
        let absent = with_suffix(path, ABSENT_SUFFIX);
        if self.live().contains(path) {
            return Ok(());
        }
        // The file may have changed since a stale backup was taken
        for stale in [&backup, &absent] {
            if tokio::fs::try_exists(stale).await.unwrap_or(false) {
                tracing::warn!(path = %stale.display(), "Replacing stale fix backup");
                tokio::fs::remove_file(stale).await.map_err(io_err(stale))?;
            }
        }
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::copy(path, &backup).await.map_err(io_err(path))?;
        } else {
            tokio::fs::write(&absent, b"").await.map_err(io_err(path))?;
        }
        self.live().insert(path.to_path_buf());
        Ok(())
    }

    async fn run_command(&self, step: &FixStep) -> Result<(String, Option<String>), ExecutionError> {
        let command = step
            .param_str("command")
            .unwrap_or(step.target.as_str())
            .to_string();
        if command.trim().is_empty() {
            return Err(ExecutionError::InvalidStep("run_command without a command".into()));
        }
        let backup = step.param_str("backup").map(str::to_string);
        if let Some(file) = &backup {
            self.backup(&self.resolve(file)).await?;
        }

        tracing::info!(command = %command, "Running fix command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExecutionError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok((format!("ran `{command}`"), backup))
    }

    async fn edit_file(&self, step: &FixStep) -> Result<(String, Option<String>), ExecutionError> {
        let path = self.resolve(&step.target);
        let original = tokio::fs::read_to_string(&path).await.map_err(io_err(&path))?;

        let updated = if let Some(find) = step.param_str("find") {
            let replace = step.param_str("replace").unwrap_or_default();
            if !original.contains(find) {
                return Err(ExecutionError::InvalidStep(format!(
                    "'{find}' not found in {}",
                    step.target
                )));
            }
            original.replacen(find, replace, 1)
        } else if let Some(prefix) = step.param_str("prepend") {
            format!("{prefix}{original}")
        } else {
            return Err(ExecutionError::InvalidStep(
                "edit_file needs 'find'/'replace' or 'prepend'".into(),
            ));
        };

        self.backup(&path).await?;
        tokio::fs::write(&path, updated).await.map_err(io_err(&path))?;
        Ok((format!("edited {}", step.target), Some(step.target.clone())))
    }

    async fn update_config(&self, step: &FixStep) -> Result<(String, Option<String>), ExecutionError> {
        let key = step
            .param_str("key")
            .ok_or_else(|| ExecutionError::InvalidStep("update_config without a key".into()))?
            .to_string();
        let value = step
            .parameters
            .get("value")
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidStep("update_config without a value".into()))?;
        let path = self.resolve(&step.target);

        let mut doc = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                ExecutionError::InvalidStep(format!("{} is not valid JSON: {e}", step.target))
            })?,
            Ok(_) => serde_json::json!({}),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(io_err(&path)(e)),
        };
        set_json_path(&mut doc, &key, value)?;

        self.backup(&path).await?;
        let rendered = serde_json::to_string_pretty(&doc)
            .map_err(|e| ExecutionError::InvalidStep(e.to_string()))?;
        tokio::fs::write(&path, rendered + "\n").await.map_err(io_err(&path))?;
        Ok((format!("set {key} in {}", step.target), Some(step.target.clone())))
    }

    async fn restore_file(&self, step: &FixStep) -> Result<(String, Option<String>), ExecutionError> {
        let path = self.resolve(&step.target);
        let backup = with_suffix(&path, BACKUP_SUFFIX);
        let absent = with_suffix(&path, ABSENT_SUFFIX);

        if tokio::fs::try_exists(&backup).await.unwrap_or(false) {
            tokio::fs::copy(&backup, &path).await.map_err(io_err(&path))?;
            tokio::fs::remove_file(&backup).await.map_err(io_err(&backup))?;
            self.live().remove(&path);
            Ok((format!("restored {}", step.target), None))
        } else if tokio::fs::try_exists(&absent).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
            tokio::fs::remove_file(&absent).await.map_err(io_err(&absent))?;
            self.live().remove(&path);
            Ok((format!("removed {} created by the fix", step.target), None))
        } else {
            Err(ExecutionError::InvalidStep(format!(
                "no backup recorded for {}",
                step.target
            )))
        }
    }
}

#[async_trait::async_trait]
impl StepExecutor for ShellStepExecutor {
    async fn execute(&self, step: &FixStep, index: usize) -> Result<AppliedChange, ExecutionError> {
        let (summary, backup) = match step.action {
            StepAction::RunCommand => self.run_command(step).await?,
            StepAction::EditFile => self.edit_file(step).await?,
            StepAction::UpdateConfig => self.update_config(step).await?,
            StepAction::RestoreFile => self.restore_file(step).await?,
        };
        Ok(AppliedChange {
            step_index: index,
            action: step.action,
            target: step.target.clone(),
            summary,
            backup,
        })
    }

    async fn commit(&self, changes: &[AppliedChange]) {
        for file in changes.iter().filter_map(|c| c.backup.as_deref()) {
            self.drop_backup(&self.resolve(file)).await;
        }
    }

    async fn discard(&self, steps: &[FixStep]) {
        for file in steps.iter().filter_map(backup_target) {
            let path = self.resolve(file);
            if self.live().contains(&path) {
                tracing::debug!(path = %path.display(), "Discarding fix backup");
            }
            self.drop_backup(&path).await;
        }
    }
}

/// Dry-run executor: records every step, touches nothing.
#[derive(Default)]
pub struct RecordingExecutor {
    steps: Mutex<Vec<FixStep>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<FixStep> {
        self.steps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(&self, step: &FixStep, index: usize) -> Result<AppliedChange, ExecutionError> {
        tracing::info!(action = step.action.as_str(), target = %step.target, "Dry run: step recorded");
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(step.clone());
        Ok(AppliedChange {
            step_index: index,
            action: step.action,
            target: step.target.clone(),
            summary: format!("dry run: {} {}", step.action.as_str(), step.target),
            backup: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_json_path_nested() {
        let mut doc = serde_json::json!({"compilerOptions": {"strict": false}});
        set_json_path(&mut doc, "compilerOptions.strict", serde_json::json!(true)).unwrap();
        set_json_path(&mut doc, "a.b.c", serde_json::json!(1)).unwrap();
        assert_eq!(doc["compilerOptions"]["strict"], true);
        assert_eq!(doc["a"]["b"]["c"], 1);

        let mut scalar = serde_json::json!({"a": 1});
        assert!(set_json_path(&mut scalar, "a.b", serde_json::json!(2)).is_err());
    }

    #[test]
    fn test_tail_keeps_last_chars() {
        assert_eq!(tail("  short\n"), "short");
        let long = format!("{}é{}", "a".repeat(10), "b".repeat(OUTPUT_TAIL - 1));
        let kept = tail(&long);
        assert_eq!(kept.chars().count(), OUTPUT_TAIL);
        assert!(kept.starts_with('é'));
    }

    #[test]
    fn test_error_codes_and_recoverability() {
        assert_eq!(ExecutionError::Timeout(10).code(), "execution_timeout");
        assert!(ExecutionError::Timeout(10).recoverable());
        assert!(!ExecutionError::Unsupported("x").recoverable());
    }

    #[tokio::test]
    async fn test_edit_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "const x = foo;\n").unwrap();
        let exec = ShellStepExecutor::new(dir.path());

        let edit = FixStep::new(StepAction::EditFile, "a.ts")
            .with("find", "foo")
            .with("replace", "bar");
        let change = exec.execute(&edit, 0).await.unwrap();
        assert_eq!(change.step_index, 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "const x = bar;\n");

        exec.execute(&FixStep::new(StepAction::RestoreFile, "a.ts"), 1)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "const x = foo;\n");
        assert!(!dir.path().join("a.ts.autofix.bak").exists());
    }

    #[tokio::test]
    async fn test_edit_with_missing_pattern_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "hello").unwrap();
        let exec = ShellStepExecutor::new(dir.path());
        let step = FixStep::new(StepAction::EditFile, "a.ts").with("find", "nope").with("replace", "x");
        let err = exec.execute(&step, 0).await.unwrap_err();
        assert_eq!(err.code(), "invalid_step");
        // Nothing was modified, so nothing was backed up
        assert!(!dir.path().join("a.ts.autofix.bak").exists());
    }

    #[tokio::test]
    async fn test_update_config_creates_and_restore_removes() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellStepExecutor::new(dir.path());
        let step = FixStep::new(StepAction::UpdateConfig, "settings.json")
            .with("key", "build.incremental")
            .with("value", false);
        exec.execute(&step, 0).await.unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("settings.json")).unwrap()).unwrap();
        assert_eq!(doc["build"]["incremental"], false);

        exec.execute(&FixStep::new(StepAction::RestoreFile, "settings.json"), 1)
            .await
            .unwrap();
        assert!(!dir.path().join("settings.json").exists());
    }

    #[tokio::test]
    async fn test_run_command_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellStepExecutor::new(dir.path());
        exec.execute(&FixStep::command("echo ok > out.txt"), 0).await.unwrap();
        assert!(dir.path().join("out.txt").exists());

        let err = exec
            .execute(&FixStep::command("echo broken >&2; exit 3"), 1)
            .await
            .unwrap_err();
        match err {
            ExecutionError::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_drops_backups() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "foo").unwrap();
        let exec = ShellStepExecutor::new(dir.path());
        let step = FixStep::new(StepAction::EditFile, "a.ts").with("prepend", "// fixed\n");
        let change = exec.execute(&step, 0).await.unwrap();
        assert!(dir.path().join("a.ts.autofix.bak").exists());
        exec.commit(&[change]).await;
        assert!(!dir.path().join("a.ts.autofix.bak").exists());
    }

    #[tokio::test]
    async fn test_failed_fix_backup_does_not_outlive_it() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("package.json");
        std::fs::write(&manifest, "v1").unwrap();
        let exec = ShellStepExecutor::new(dir.path());

        let failing = FixStep::command("exit 1").with("backup", "package.json");
        assert!(exec.execute(&failing, 0).await.is_err());
        exec.discard(std::slice::from_ref(&failing)).await;
        assert!(!dir.path().join("package.json.autofix.bak").exists());

        std::fs::write(&manifest, "v2-user-edit").unwrap();
        let bump = FixStep::command("echo v3 > package.json").with("backup", "package.json");
        exec.execute(&bump, 0).await.unwrap();
        exec.execute(&FixStep::new(StepAction::RestoreFile, "package.json"), 1)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "v2-user-edit");
    }

    #[tokio::test]
    async fn test_leftover_backup_on_disk_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "current").unwrap();
        std::fs::write(dir.path().join("a.ts.autofix.bak"), "ancient").unwrap();
        let exec = ShellStepExecutor::new(dir.path());

        let step = FixStep::new(StepAction::EditFile, "a.ts").with("prepend", "// fixed\n");
        exec.execute(&step, 0).await.unwrap();
        exec.execute(&FixStep::new(StepAction::RestoreFile, "a.ts"), 1)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "current");
    }

    #[test]
    fn test_backup_targets() {
        assert_eq!(backup_target(&FixStep::command("ls").with("backup", "Cargo.toml")), Some("Cargo.toml"));
        assert_eq!(backup_target(&FixStep::command("ls")), None);
        assert_eq!(backup_target(&FixStep::new(StepAction::EditFile, "a.ts")), Some("a.ts"));
        assert_eq!(backup_target(&FixStep::new(StepAction::RestoreFile, "a.ts")), None);
    }

    #[tokio::test]
    async fn test_recording_executor_touches_nothing() {
        let exec = RecordingExecutor::new();
        let change = exec.execute(&FixStep::command("rm -rf /"), 0).await.unwrap();
        assert!(change.summary.starts_with("dry run"));
        assert_eq!(exec.recorded().len(), 1);
    }
}
