//! Fix strategy generation from a registry of templates keyed by root-cause category.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use super::learner::FixLearner;
use super::types::{
    clamp_strategy, FixStep, FixStrategy, Issue, IssueType, RiskLevel, RootCauseAnalysisResult,
    RootCauseCategory, StepAction,
};
use crate::error::AppError;
use crate::validation::{clamp_unit, require_non_empty};

/// What a template does to the workspace. Risk is a fixed function of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    DependencyBump,
    LintAutofix,
    ConfigToggle,
    ImportEdit,
    TypeAnnotation,
    CacheClear,
    LogicRewrite,
    DependencyMajorUpgrade,
    Refactor,
}

impl ActionKind {
    pub fn risk(&self) -> RiskLevel {
        match self {
            ActionKind::DependencyBump | ActionKind::LintAutofix | ActionKind::ConfigToggle => {
                RiskLevel::Low
            }
            ActionKind::ImportEdit | ActionKind::TypeAnnotation | ActionKind::CacheClear => {
                RiskLevel::Medium
            }
            ActionKind::LogicRewrite | ActionKind::DependencyMajorUpgrade | ActionKind::Refactor => {
                RiskLevel::High
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DependencyBump => "dependency_bump",
            ActionKind::LintAutofix => "lint_autofix",
            ActionKind::ConfigToggle => "config_toggle",
            ActionKind::ImportEdit => "import_edit",
            ActionKind::TypeAnnotation => "type_annotation",
            ActionKind::CacheClear => "cache_clear",
            ActionKind::LogicRewrite => "logic_rewrite",
            ActionKind::DependencyMajorUpgrade => "dependency_major_upgrade",
            ActionKind::Refactor => "refactor",
        }
    }
}

/// Builds steps for a concrete issue. An empty list means "not applicable here".
pub type StepBuilder = fn(&Issue) -> Vec<FixStep>;

#[derive(Clone)]
pub struct StrategyTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub categories: Vec<RootCauseCategory>,
    pub applicable_types: Vec<IssueType>,
    pub action: ActionKind,
    pub base_confidence: f64,
    /// Issue context keys the steps need. Alignment is the fraction present.
    pub required_context: Vec<String>,
    pub prerequisites: Vec<String>,
    pub success_criteria: Vec<String>,
    pub estimated_time_ms: u64,
    pub steps: StepBuilder,
    pub rollback: StepBuilder,
}

impl StrategyTemplate {
    fn alignment(&self, issue: &Issue) -> f64 {
        if self.required_context.is_empty() {
            return 1.0;
        }
        let present = self
            .required_context
            .iter()
            .filter(|k| issue.has_context(k))
            .count();
        present as f64 / self.required_context.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Step builders
// ---------------------------------------------------------------------------

fn ctx(issue: &Issue, key: &str) -> String {
    issue.context_str(key).unwrap_or_default().to_string()
}

fn package_manager(issue: &Issue) -> String {
    issue
        .context_str("packageManager")
        .unwrap_or("npm")
        .to_string()
}

fn install_command(issue: &Issue, spec: &str) -> String {
    match package_manager(issue).as_str() {
        "cargo" => format!("cargo add {spec}"),
        "pip" => format!("pip install {spec}"),
        "yarn" => format!("yarn add {spec}"),
        "pnpm" => format!("pnpm add {spec}"),
        _ => format!("npm install {spec}"),
    }
}

fn uninstall_command(issue: &Issue, name: &str) -> String {
    match package_manager(issue).as_str() {
        "cargo" => format!("cargo remove {name}"),
        "pip" => format!("pip uninstall -y {name}"),
        "yarn" => format!("yarn remove {name}"),
        "pnpm" => format!("pnpm remove {name}"),
        _ => format!("npm uninstall {name}"),
    }
}

/// Manifest touched by dependency commands; backed up before they run.
fn manifest(issue: &Issue) -> String {
    match package_manager(issue).as_str() {
        "cargo" => "Cargo.toml".into(),
        "pip" => "requirements.txt".into(),
        _ => "package.json".into(),
    }
}

fn restore(target: impl Into<String>) -> FixStep {
    FixStep::new(StepAction::RestoreFile, target)
}

fn lint_autofix_steps(issue: &Issue) -> Vec<FixStep> {
    let Some(file) = issue.location.file.clone() else {
        return Vec::new();
    };
    let command = issue
        .context_str("fixCommand")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if file.ends_with(".rs") {
                "cargo clippy --fix --allow-dirty --allow-staged".to_string()
            } else {
                format!("npx eslint --fix {file}")
            }
        });
    vec![FixStep::command(command).with("backup", file)]
}

fn restore_location(issue: &Issue) -> Vec<FixStep> {
    issue.location.file.iter().map(restore).collect()
}

fn suggested_edit_steps(issue: &Issue) -> Vec<FixStep> {
    let (Some(file), Some(suggestion)) = (issue.location.file.clone(), issue.context.get("suggestion")) else {
        return Vec::new();
    };
    let find = suggestion.get("find").and_then(|v| v.as_str());
    let replace = suggestion.get("replace").and_then(|v| v.as_str());
    match (find, replace) {
        (Some(find), Some(replace)) => vec![FixStep::new(StepAction::EditFile, file)
            .with("find", find)
            .with("replace", replace)],
        _ => Vec::new(),
    }
}

fn add_import_steps(issue: &Issue) -> Vec<FixStep> {
    match (issue.location.file.clone(), issue.context_str("importStatement")) {
        (Some(file), Some(stmt)) if !stmt.trim().is_empty() => {
            vec![FixStep::new(StepAction::EditFile, file).with("prepend", format!("{}\n", stmt.trim_end()))]
        }
        _ => Vec::new(),
    }
}

fn install_dependency_steps(issue: &Issue) -> Vec<FixStep> {
    let name = ctx(issue, "missingDependency");
    if name.is_empty() {
        return Vec::new();
    }
    vec![FixStep::command(install_command(issue, &name)).with("backup", manifest(issue))]
}

fn uninstall_dependency_steps(issue: &Issue) -> Vec<FixStep> {
    let name = ctx(issue, "missingDependency");
    if name.is_empty() {
        return Vec::new();
    }
    vec![
        FixStep::command(uninstall_command(issue, &name)),
        restore(manifest(issue)),
    ]
}

fn versioned_install(issue: &Issue, version_key: &str) -> Vec<FixStep> {
    let (name, version) = (ctx(issue, "package"), ctx(issue, version_key));
    if name.is_empty() || version.is_empty() {
        return Vec::new();
    }
    let spec = match package_manager(issue).as_str() {
        "pip" => format!("{name}=={version}"),
        _ => format!("{name}@{version}"),
    };
    vec![FixStep::command(install_command(issue, &spec)).with("backup", manifest(issue))]
}

fn pin_version_steps(issue: &Issue) -> Vec<FixStep> {
    versioned_install(issue, "compatibleVersion")
}

fn patch_version_steps(issue: &Issue) -> Vec<FixStep> {
    versioned_install(issue, "patchedVersion")
}

fn major_upgrade_steps(issue: &Issue) -> Vec<FixStep> {
    versioned_install(issue, "latestVersion")
}

fn restore_manifest(issue: &Issue) -> Vec<FixStep> {
    vec![restore(manifest(issue))]
}

fn lockfile(issue: &Issue) -> String {
    issue.context_str("lockfile").map(str::to_string).unwrap_or_else(|| {
        match package_manager(issue).as_str() {
            "cargo" => "Cargo.lock".into(),
            "yarn" => "yarn.lock".into(),
            "pnpm" => "pnpm-lock.yaml".into(),
            _ => "package-lock.json".into(),
        }
    })
}

fn regenerate_lockfile_steps(issue: &Issue) -> Vec<FixStep> {
    let lock = lockfile(issue);
    let regenerate = match package_manager(issue).as_str() {
        "cargo" => "cargo generate-lockfile".to_string(),
        "yarn" => "yarn install".to_string(),
        "pnpm" => "pnpm install".to_string(),
        _ => "npm install".to_string(),
    };
    vec![FixStep::command(format!("rm -f {lock} && {regenerate}")).with("backup", lock)]
}

fn restore_lockfile(issue: &Issue) -> Vec<FixStep> {
    vec![restore(lockfile(issue))]
}

fn set_config_steps(issue: &Issue) -> Vec<FixStep> {
    let (file, key) = (ctx(issue, "configFile"), ctx(issue, "configKey"));
    match issue.context.get("expectedValue") {
        Some(value) if !file.is_empty() && !key.is_empty() => {
            vec![FixStep::new(StepAction::UpdateConfig, file)
                .with("key", key)
                .with("value", value.clone())]
        }
        _ => Vec::new(),
    }
}

fn restore_config(issue: &Issue) -> Vec<FixStep> {
    let file = ctx(issue, "configFile");
    if file.is_empty() {
        Vec::new()
    } else {
        vec![restore(file)]
    }
}

fn clear_cache_steps(issue: &Issue) -> Vec<FixStep> {
    let command = match issue.context_str("cacheDir") {
        Some(dir) if !dir.trim().is_empty() => format!("rm -rf {}", dir.trim()),
        _ if package_manager(issue) == "cargo" => "cargo clean".to_string(),
        _ => "rm -rf node_modules/.cache".to_string(),
    };
    vec![FixStep::command(command)]
}

fn no_rollback(_: &Issue) -> Vec<FixStep> {
    Vec::new()
}

fn revert_change_steps(issue: &Issue) -> Vec<FixStep> {
    let commit = ctx(issue, "suspectCommit");
    if commit.is_empty() {
        return Vec::new();
    }
    vec![FixStep::command(format!("git revert --no-edit {commit}"))]
}

fn undo_revert(_: &Issue) -> Vec<FixStep> {
    vec![FixStep::command("git revert --no-edit HEAD")]
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn template(
    id: &str,
    name: &str,
    description: &str,
    categories: &[RootCauseCategory],
    applicable_types: &[IssueType],
    action: ActionKind,
    base_confidence: f64,
    required_context: &[&str],
    estimated_time_ms: u64,
    steps: StepBuilder,
    rollback: StepBuilder,
) -> StrategyTemplate {
    StrategyTemplate {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        categories: categories.to_vec(),
        applicable_types: applicable_types.to_vec(),
        action,
        base_confidence,
        required_context: required_context.iter().map(|s| s.to_string()).collect(),
        prerequisites: Vec::new(),
        success_criteria: vec!["issue no longer reported".into()],
        estimated_time_ms,
        steps,
        rollback,
    }
}

/// Built-in templates. Performance bottlenecks deliberately have none:
/// they need a human.
pub fn default_templates() -> Vec<StrategyTemplate> {
    use IssueType as T;
    use RootCauseCategory as C;

    let mut templates = vec![
        template(
            "lint-autofix",
            "Run linter autofix",
            "Apply the linter's own automatic fix to the offending file",
            &[C::SyntaxError],
            &[T::Lint],
            ActionKind::LintAutofix,
            0.9,
            &[],
            20_000,
            lint_autofix_steps,
            restore_location,
        ),
        template(
            "apply-suggested-edit",
            "Apply tool-suggested edit",
            "Apply the replacement suggested by the compiler or linter",
            &[C::SyntaxError, C::TypeError, C::LogicError],
            &[T::Compilation, T::Lint, T::Test, T::Runtime],
            ActionKind::TypeAnnotation,
            0.85,
            &["suggestion"],
            5_000,
            suggested_edit_steps,
            restore_location,
        ),
        template(
            "add-missing-import",
            "Add missing import",
            "Insert the import statement for an unresolved identifier",
            &[C::TypeError, C::MissingDependency],
            &[T::Compilation],
            ActionKind::ImportEdit,
            0.8,
            &["importStatement"],
            5_000,
            add_import_steps,
            restore_location,
        ),
        template(
            "install-dependency",
            "Install missing dependency",
            "Add the missing package to the project manifest",
            &[C::MissingDependency],
            &[T::Dependency, T::Compilation, T::Test, T::Runtime],
            ActionKind::DependencyBump,
            0.85,
            &["missingDependency"],
            60_000,
            install_dependency_steps,
            uninstall_dependency_steps,
        ),
        template(
            "pin-compatible-version",
            "Pin compatible version",
            "Install the version that satisfies every dependent",
            &[C::VersionConflict],
            &[T::Dependency, T::Compilation],
            ActionKind::DependencyBump,
            0.75,
            &["package", "compatibleVersion"],
            60_000,
            pin_version_steps,
            restore_manifest,
        ),
        template(
            "regenerate-lockfile",
            "Regenerate lockfile",
            "Delete and regenerate the lockfile to re-resolve versions",
            &[C::VersionConflict],
            &[T::Dependency],
            ActionKind::CacheClear,
            0.6,
            &[],
            120_000,
            regenerate_lockfile_steps,
            restore_lockfile,
        ),
        template(
            "patch-vulnerable-package",
            "Upgrade to patched version",
            "Move the vulnerable package to its patched release",
            &[C::SecurityVulnerability],
            &[T::Dependency, T::Security],
            ActionKind::DependencyBump,
            0.85,
            &["package", "patchedVersion"],
            60_000,
            patch_version_steps,
            restore_manifest,
        ),
        template(
            "major-upgrade-vulnerable-package",
            "Major upgrade of vulnerable package",
            "Upgrade the vulnerable package across a major version",
            &[C::SecurityVulnerability],
            &[T::Dependency, T::Security],
            ActionKind::DependencyMajorUpgrade,
            0.7,
            &["package", "latestVersion"],
            180_000,
            major_upgrade_steps,
            restore_manifest,
        ),
        template(
            "set-config-value",
            "Set configuration value",
            "Write the expected value for the offending configuration key",
            &[C::ConfigurationError],
            &[T::Configuration, T::Compilation, T::Runtime],
            ActionKind::ConfigToggle,
            0.85,
            &["configFile", "configKey", "expectedValue"],
            2_000,
            set_config_steps,
            restore_config,
        ),
        template(
            "clear-build-cache",
            "Clear build cache",
            "Remove stale build artifacts and caches",
            &[C::ConfigurationError, C::TypeError, C::VersionConflict],
            &[T::Compilation, T::Test, T::Dependency],
            ActionKind::CacheClear,
            0.45,
            &[],
            30_000,
            clear_cache_steps,
            no_rollback,
        ),
        template(
            "revert-recent-change",
            "Revert suspect commit",
            "Revert the commit that introduced the failure",
            &[C::LogicError, C::TypeError, C::SyntaxError],
            &[T::Test, T::Runtime, T::Compilation],
            ActionKind::LogicRewrite,
            0.55,
            &["suspectCommit"],
            15_000,
            revert_change_steps,
            undo_revert,
        ),
    ];

    for t in &mut templates {
        match t.action {
            ActionKind::DependencyBump | ActionKind::DependencyMajorUpgrade | ActionKind::CacheClear => {
                t.prerequisites.push("package manager available on PATH".into());
                t.success_criteria.push("dependency install exits 0".into());
            }
            ActionKind::LogicRewrite => t.prerequisites.push("clean git working tree".into()),
            _ => {}
        }
    }
    templates
}

pub struct FixGenerator {
    templates: RwLock<Vec<StrategyTemplate>>,
    learner: Arc<FixLearner>,
}

impl FixGenerator {
    pub fn new(learner: Arc<FixLearner>) -> Self {
        Self::with_templates(learner, default_templates())
    }

    pub fn with_templates(learner: Arc<FixLearner>, templates: Vec<StrategyTemplate>) -> Self {
        Self {
            templates: RwLock::new(templates),
            learner,
        }
    }

    /// Add a template. Ids must be unique.
    pub fn register_template(&self, template: StrategyTemplate) -> Result<(), AppError> {
        require_non_empty("template id", &template.id)?;
        require_non_empty("template name", &template.name)?;
        if !(0.0..=1.0).contains(&template.base_confidence) {
            return Err(AppError::Validation(format!(
                "template {} base confidence must be within [0, 1]",
                template.id
            )));
        }
        if template.categories.is_empty() || template.applicable_types.is_empty() {
            return Err(AppError::Validation(format!(
                "template {} must name at least one category and issue type",
                template.id
            )));
        }
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        if templates.iter().any(|t| t.id == template.id) {
            return Err(AppError::Validation(format!(
                "template {} is already registered",
                template.id
            )));
        }
        tracing::info!(template = %template.id, action = template.action.as_str(), "Registered fix template");
        templates.push(template);
        Ok(())
    }

    pub fn template_ids(&self) -> Vec<String> {
        self.templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    /// Ranked, capped strategies. No feasible template is an empty list, not an error.
    pub fn generate_strategies(
        &self,
        issue: &Issue,
        analysis: &RootCauseAnalysisResult,
        max_strategies: usize,
    ) -> Vec<FixStrategy> {
        let templates = self.templates.read().unwrap_or_else(|e| e.into_inner());
        let blend = 0.6 + 0.4 * clamp_unit(analysis.confidence);

        let mut strategies: Vec<FixStrategy> = templates
            .iter()
            .filter(|t| t.categories.contains(&analysis.category))
            .filter(|t| t.applicable_types.contains(&issue.issue_type))
            .filter_map(|t| {
                let alignment = t.alignment(issue);
                if alignment <= 0.0 {
                    return None;
                }
                let steps = (t.steps)(issue);
                if steps.is_empty() {
                    return None;
                }
                let factor = self.learner.strategy_factor(&t.id, issue.issue_type);
                let confidence = t.base_confidence * alignment * blend * factor;

                let mut tags: BTreeSet<String> = BTreeSet::new();
                tags.insert(t.action.as_str().to_string());
                tags.insert(analysis.category.as_str().to_string());

                Some(clamp_strategy(FixStrategy {
                    id: format!("{}:{}", t.id, issue.id),
                    template_id: t.id.clone(),
                    name: t.name.clone(),
                    description: t.description.clone(),
                    applicable_types: t.applicable_types.clone(),
                    steps,
                    risk_level: t.action.risk(),
                    confidence,
                    estimated_time_ms: t.estimated_time_ms,
                    prerequisites: t.prerequisites.clone(),
                    rollback_steps: (t.rollback)(issue),
                    success_criteria: t.success_criteria.clone(),
                    tags,
                }))
            })
            .collect();

        strategies.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.risk_level.cmp(&b.risk_level))
                .then(a.template_id.cmp(&b.template_id))
        });
        strategies.truncate(max_strategies);

        if strategies.is_empty() {
            tracing::info!(
                issue_id = %issue.id,
                category = analysis.category.as_str(),
                "No feasible fix strategy"
            );
        }
        strategies
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::analyzer::tests::issue;
    use crate::engine::types::{Complexity, FixResult, FixStatus};

    pub(crate) fn analysis(issue: &Issue, category: RootCauseCategory, confidence: f64) -> RootCauseAnalysisResult {
        RootCauseAnalysisResult {
            issue_id: issue.id.clone(),
            root_cause: "test".into(),
            confidence,
            evidence: vec![],
            category,
            complexity: Complexity::Simple,
            degraded: false,
        }
    }

    fn generator() -> FixGenerator {
        FixGenerator::new(Arc::new(FixLearner::new()))
    }

    #[test]
    fn test_risk_mapping() {
        assert_eq!(ActionKind::LintAutofix.risk(), RiskLevel::Low);
        assert_eq!(ActionKind::ImportEdit.risk(), RiskLevel::Medium);
        assert_eq!(ActionKind::DependencyMajorUpgrade.risk(), RiskLevel::High);
    }

    #[test]
    fn test_category_without_templates_yields_empty_list() {
        let i = issue(IssueType::Performance, "slow render", serde_json::json!({}));
        let a = analysis(&i, RootCauseCategory::PerformanceBottleneck, 0.9);
        assert!(generator().generate_strategies(&i, &a, 3).is_empty());
    }

    #[test]
    fn test_missing_context_is_infeasible() {
        let i = issue(IssueType::Dependency, "lodash vulnerable", serde_json::json!({}));
        let a = analysis(&i, RootCauseCategory::SecurityVulnerability, 0.9);
        assert!(generator().generate_strategies(&i, &a, 3).is_empty());
    }

    #[test]
    fn test_ranked_by_confidence_then_risk() {
        let i = issue(
            IssueType::Dependency,
            "lodash vulnerable",
            serde_json::json!({"package": "lodash", "patchedVersion": "4.17.21", "latestVersion": "5.0.0"}),
        );
        let a = analysis(&i, RootCauseCategory::SecurityVulnerability, 0.9);
        let strategies = generator().generate_strategies(&i, &a, 3);
        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].template_id, "patch-vulnerable-package");
        assert_eq!(strategies[0].risk_level, RiskLevel::Low);
        assert_eq!(strategies[1].risk_level, RiskLevel::High);
        assert!(strategies[0].confidence >= strategies[1].confidence);
        assert_eq!(strategies[0].id, format!("patch-vulnerable-package:{}", i.id));
        assert_eq!(strategies[0].steps[0].param_str("command"), Some("npm install lodash@4.17.21"));
        assert_eq!(strategies[0].rollback_steps[0].action, StepAction::RestoreFile);
    }

    #[test]
    fn test_every_backed_up_file_is_restored_on_rollback() {
        let mut i = issue(
            IssueType::Dependency,
            "anything",
            serde_json::json!({
                "suggestion": {"find": "a", "replace": "b"},
                "importStatement": "import { x } from './x';",
                "missingDependency": "left-pad",
                "package": "lodash",
                "compatibleVersion": "4.17.0",
                "patchedVersion": "4.17.21",
                "latestVersion": "5.0.0",
                "configFile": "tsconfig.json",
                "configKey": "compilerOptions.strict",
                "expectedValue": true,
                "suspectCommit": "abc123"
            }),
        );
        i.location.file = Some("src/a.ts".into());

        for template in default_templates() {
            let steps = (template.steps)(&i);
            assert!(!steps.is_empty(), "{} produced no steps", template.id);
            let rollback = (template.rollback)(&i);
            for file in steps.iter().filter_map(crate::engine::executor::backup_target) {
                assert!(
                    rollback
                        .iter()
                        .any(|s| s.action == StepAction::RestoreFile && s.target == file),
                    "{} never restores {file}",
                    template.id
                );
            }
        }
    }

    #[test]
    fn test_cap_applies() {
        let mut i = issue(
            IssueType::Compilation,
            "Cannot find name 'x'",
            serde_json::json!({
                "importStatement": "import { x } from './x';",
                "suggestion": {"find": "x", "replace": "y"},
                "suspectCommit": "abc123"
            }),
        );
        i.location.file = Some("src/a.ts".into());
        let a = analysis(&i, RootCauseCategory::TypeError, 0.8);
        let all = generator().generate_strategies(&i, &a, 10);
        assert_eq!(all.len(), 4);
        let capped = generator().generate_strategies(&i, &a, 2);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].id, all[0].id);
        assert!(all.iter().all(|s| (0.0..=1.0).contains(&s.confidence)));
    }

    #[test]
    fn test_learner_shifts_confidence() {
        let learner = Arc::new(FixLearner::new());
        let generator = FixGenerator::new(learner.clone());
        let mut i = issue(IssueType::Lint, "Unexpected token", serde_json::json!({}));
        i.location.file = Some("src/a.js".into());
        let a = analysis(&i, RootCauseCategory::SyntaxError, 0.9);
        let before = generator.generate_strategies(&i, &a, 3)[0].confidence;

        for _ in 0..5 {
            let mut r = FixResult::pending(&i, &generator.generate_strategies(&i, &a, 3)[0], None, 1);
            r.status = FixStatus::Failed;
            learner.record_fix_result(&r);
        }
        let after = generator.generate_strategies(&i, &a, 3)[0].confidence;
        assert!(after < before);
    }

    #[test]
    fn test_register_template_rejects_duplicates() {
        let generator = generator();
        let mut t = default_templates().remove(0);
        assert!(generator.register_template(t.clone()).is_err());
        t.id = "custom-lint".into();
        assert!(generator.register_template(t).is_ok());
        assert!(generator.template_ids().contains(&"custom-lint".to_string()));
    }
}
