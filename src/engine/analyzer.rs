//! Root-cause analysis: weighted evidence from four independent sources.
//!
//! `analyze_issue` is pure: the same issue, history view and evidence cap
//! always produce the same result.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::learner::{FixLearner, TypeOutlook};
use super::types::{
    Complexity, Evidence, EvidenceSource, Issue, IssueType, RootCauseAnalysisResult,
    RootCauseCategory,
};
use crate::config::AutoFixConfig;
use crate::validation::clamp_unit;

/// Ceiling for results produced without usable evidence.
pub const DEGRADED_CONFIDENCE: f64 = 0.2;

/// Issues touching more files than this are at least moderately complex.
const SPREAD_THRESHOLD: usize = 3;

// ---------------------------------------------------------------------------
// Known-problem patterns
// ---------------------------------------------------------------------------

pub struct PatternTemplate {
    pub id: &'static str,
    pub regex: Regex,
    pub category: RootCauseCategory,
    pub weight: f64,
    pub description: &'static str,
}

const PATTERN_SOURCES: &[(&str, &str, RootCauseCategory, f64, &str)] = &[
    (
        "unresolved_name",
        r"(?i)\bTS2304\b|cannot find name|\bE0425\b|is not defined\b",
        RootCauseCategory::TypeError,
        0.9,
        "Identifier is used without being declared or imported",
    ),
    (
        "type_mismatch",
        r"(?i)\bTS2322\b|\bTS2345\b|\bE0308\b|is not assignable to|mismatched types",
        RootCauseCategory::TypeError,
        0.85,
        "Value type does not match the expected type",
    ),
    (
        "missing_module",
        r"(?i)\bE0432\b|\bE0433\b|\bTS2307\b|unresolved import|cannot find module|module not found|no module named",
        RootCauseCategory::MissingDependency,
        0.9,
        "Imported module or package cannot be resolved",
    ),
    (
        "resolution_conflict",
        r"(?i)\bERESOLVE\b|conflicting peer dependency|version conflict|failed to select a version|could not resolve dependency",
        RootCauseCategory::VersionConflict,
        0.85,
        "Dependency versions cannot be resolved together",
    ),
    (
        "known_vulnerability",
        r"(?i)\bCVE-\d{4}-\d+|\bGHSA-[0-9a-z-]+|\bRUSTSEC-\d{4}-\d+|vulnerab",
        RootCauseCategory::SecurityVulnerability,
        0.9,
        "Package version has a published vulnerability",
    ),
    (
        "syntax",
        r"(?i)syntaxerror|unexpected token|parse error|\bTS1005\b|expected one of",
        RootCauseCategory::SyntaxError,
        0.85,
        "Source does not parse",
    ),
    (
        "perf_regression",
        r"(?i)performance regression|exceeded (the )?budget|out of memory|memory leak|took \d+ ?ms",
        RootCauseCategory::PerformanceBottleneck,
        0.7,
        "Measured cost exceeds its baseline",
    ),
    (
        "bad_config",
        r"(?i)invalid config|configuration error|missing (required )?(env|environment) variable|unknown (compiler )?option",
        RootCauseCategory::ConfigurationError,
        0.75,
        "Configuration value is missing or invalid",
    ),
    (
        "failed_assertion",
        r"(?i)assertion failed|assertionerror|expected .+ (to|but) |panicked at|cannot read propert",
        RootCauseCategory::LogicError,
        0.7,
        "Program behaviour differs from what the test expects",
    ),
];

static PATTERNS: OnceLock<Vec<PatternTemplate>> = OnceLock::new();

pub fn patterns() -> &'static [PatternTemplate] {
    PATTERNS.get_or_init(|| {
        PATTERN_SOURCES
            .iter()
            .filter_map(|(id, raw, category, weight, description)| match Regex::new(raw) {
                Ok(regex) => Some(PatternTemplate {
                    id: *id,
                    regex,
                    category: *category,
                    weight: *weight,
                    description: *description,
                }),
                Err(e) => {
                    tracing::error!(pattern = *id, error = %e, "Invalid root-cause pattern");
                    None
                }
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Evidence sources
// ---------------------------------------------------------------------------

fn search_text(issue: &Issue) -> String {
    let mut text = format!("{}\n{}", issue.title, issue.description);
    if let Some(code) = issue.context_str("errorCode") {
        text.push('\n');
        text.push_str(code);
    }
    text
}

pub fn pattern_evidence(issue: &Issue) -> Vec<Evidence> {
    let text = search_text(issue);
    patterns()
        .iter()
        .filter(|p| p.regex.is_match(&text))
        .map(|p| Evidence {
            evidence_type: format!("pattern:{}", p.id),
            description: p.description.to_string(),
            weight: p.weight,
            source: EvidenceSource::PatternMatch,
            implies: Some(p.category),
        })
        .collect()
}

/// Category implied by the issue type alone.
pub fn type_category(issue: &Issue) -> RootCauseCategory {
    match issue.issue_type {
        IssueType::Compilation => RootCauseCategory::TypeError,
        IssueType::Test | IssueType::Runtime => RootCauseCategory::LogicError,
        IssueType::Dependency if issue.context_bool("vulnerable") => {
            RootCauseCategory::SecurityVulnerability
        }
        IssueType::Dependency => RootCauseCategory::MissingDependency,
        IssueType::Lint => RootCauseCategory::SyntaxError,
        IssueType::Performance => RootCauseCategory::PerformanceBottleneck,
        IssueType::Security => RootCauseCategory::SecurityVulnerability,
        IssueType::Configuration => RootCauseCategory::ConfigurationError,
    }
}

pub fn structural_evidence(issue: &Issue) -> Vec<Evidence> {
    let mut out = Vec::new();
    let implied = type_category(issue);
    let structural = |kind: &str, description: String, weight: f64, implies| Evidence {
        evidence_type: format!("structure:{kind}"),
        description,
        weight,
        source: EvidenceSource::StructuralHeuristic,
        implies,
    };

    if let Some(file) = &issue.location.file {
        let weight = if issue.location.line.is_some() { 0.4 } else { 0.3 };
        out.push(structural(
            "location",
            format!("Reported at {file}"),
            weight,
            Some(implied),
        ));
    }
    if let Some(code) = issue.context_str("errorCode") {
        out.push(structural(
            "error_code",
            format!("Tool reported error code {code}"),
            0.6,
            Some(implied),
        ));
    }

    match issue.issue_type {
        IssueType::Performance => {
            if let (Some(measured), Some(baseline)) =
                (issue.context_f64("durationMs"), issue.context_f64("baselineMs"))
            {
                if baseline > 0.0 && measured > baseline * 1.2 {
                    out.push(structural(
                        "over_baseline",
                        format!("{measured:.0}ms against a {baseline:.0}ms baseline"),
                        0.7,
                        Some(RootCauseCategory::PerformanceBottleneck),
                    ));
                }
            }
        }
        IssueType::Runtime | IssueType::Test if issue.has_context("stackTrace") => {
            out.push(structural(
                "stack_trace",
                "Failure carries a stack trace".into(),
                0.45,
                Some(RootCauseCategory::LogicError),
            ));
        }
        IssueType::Configuration if issue.has_context("configKey") => {
            out.push(structural(
                "config_key",
                format!(
                    "Configuration key '{}' is involved",
                    issue.context_str("configKey").unwrap_or_default()
                ),
                0.6,
                Some(RootCauseCategory::ConfigurationError),
            ));
        }
        IssueType::Lint if issue.has_context("rule") => {
            out.push(structural(
                "lint_rule",
                format!("Lint rule {}", issue.context_str("rule").unwrap_or_default()),
                0.5,
                Some(RootCauseCategory::SyntaxError),
            ));
        }
        _ => {}
    }
    out
}

pub fn dependency_evidence(issue: &Issue) -> Vec<Evidence> {
    let mut out = Vec::new();
    let dep = |kind: &str, description: String, weight: f64, implies| Evidence {
        evidence_type: format!("dependency:{kind}"),
        description,
        weight,
        source: EvidenceSource::DependencyGraph,
        implies,
    };

    if let Some(name) = issue.context_str("missingDependency").filter(|s| !s.is_empty()) {
        out.push(dep(
            "missing",
            format!("Package '{name}' is not installed"),
            0.85,
            Some(RootCauseCategory::MissingDependency),
        ));
    }
    if issue.has_context("conflicts") {
        out.push(dep(
            "conflicts",
            "Dependency graph reports conflicting version requirements".into(),
            0.8,
            Some(RootCauseCategory::VersionConflict),
        ));
    }
    if issue.context_bool("vulnerable") {
        out.push(dep(
            "vulnerable",
            format!(
                "Package '{}' is flagged vulnerable",
                issue.context_str("package").unwrap_or("unknown")
            ),
            0.8,
            Some(RootCauseCategory::SecurityVulnerability),
        ));
    }
    if issue.context_bool("lockfileChanged") {
        out.push(dep(
            "lockfile",
            "Lockfile changed since the last good build".into(),
            0.5,
            Some(RootCauseCategory::VersionConflict),
        ));
    }

    // A declared dependency named in the failure text
    if let Some(deps) = issue.context.get("dependencies") {
        let names: BTreeSet<String> = match deps {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        };
        let text = search_text(issue);
        if let Some(name) = names.iter().find(|n| n.len() > 1 && text.contains(n.as_str())) {
            out.push(dep(
                "referenced",
                format!("Failure mentions declared dependency '{name}'"),
                0.45,
                None,
            ));
        }
    }
    out
}

pub fn historical_evidence(issue: &Issue, outlook: &TypeOutlook) -> Vec<Evidence> {
    if outlook.samples == 0 {
        return Vec::new();
    }
    vec![Evidence {
        evidence_type: "history:outcomes".into(),
        description: format!(
            "{} past fixes for {} issues, accuracy {:.2}",
            outlook.samples, issue.issue_type, outlook.accuracy
        ),
        weight: clamp_unit(outlook.accuracy),
        source: EvidenceSource::HistoricalOutcome,
        implies: outlook.dominant_category,
    }]
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Weight-average of weights (Σw²/Σw): strong evidence dominates weak.
fn weighted_confidence(evidence: &[Evidence]) -> f64 {
    let sum: f64 = evidence.iter().map(|e| e.weight).sum();
    if sum <= 0.0 {
        return 0.0;
    }
    evidence.iter().map(|e| e.weight * e.weight).sum::<f64>() / sum
}

/// History scales confidence by 0.75..1.25; the 0.5 seed is neutral.
fn accuracy_scale(accuracy: f64) -> f64 {
    0.75 + 0.5 * clamp_unit(accuracy)
}

fn base_complexity(category: RootCauseCategory) -> Complexity {
    match category {
        RootCauseCategory::SyntaxError
        | RootCauseCategory::ConfigurationError
        | RootCauseCategory::MissingDependency => Complexity::Simple,
        RootCauseCategory::TypeError
        | RootCauseCategory::VersionConflict
        | RootCauseCategory::SecurityVulnerability => Complexity::Moderate,
        RootCauseCategory::LogicError | RootCauseCategory::PerformanceBottleneck => {
            Complexity::Complex
        }
    }
}

fn location_spread(issue: &Issue) -> usize {
    issue
        .context
        .get("affectedFiles")
        .and_then(|v| v.as_array())
        .map_or(0, |a| a.len())
}

/// Result used when analysis timed out, failed or found nothing.
pub fn degraded_result(issue: &Issue, reason: &str) -> RootCauseAnalysisResult {
    let category = type_category(issue);
    RootCauseAnalysisResult {
        issue_id: issue.id.clone(),
        root_cause: format!("{reason}; classified as {} from the issue type", category.as_str()),
        confidence: clamp_unit(DEGRADED_CONFIDENCE * issue.confidence),
        evidence: Vec::new(),
        category,
        complexity: base_complexity(category),
        degraded: true,
    }
}

pub fn analyze_issue(issue: &Issue, outlook: &TypeOutlook, max_evidence: usize) -> RootCauseAnalysisResult {
    let mut evidence: Vec<Evidence> = pattern_evidence(issue)
        .into_iter()
        .chain(structural_evidence(issue))
        .chain(dependency_evidence(issue))
        .chain(historical_evidence(issue, outlook))
        .map(|mut e| {
            e.weight = clamp_unit(e.weight);
            e
        })
        .filter(|e| e.weight > 0.0)
        .collect();

    if evidence.is_empty() {
        return degraded_result(issue, "No evidence found");
    }

    // Stable sort keeps source order among equal weights
    evidence.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.source.cmp(&b.source))
    });
    evidence.truncate(max_evidence.max(1));

    let category = if issue.issue_type == IssueType::Security {
        RootCauseCategory::SecurityVulnerability
    } else {
        evidence
            .iter()
            .find_map(|e| e.implies)
            .unwrap_or_else(|| type_category(issue))
    };

    let mut complexity = base_complexity(category);
    if location_spread(issue) > SPREAD_THRESHOLD {
        complexity = complexity.bump();
    }
    let implied: BTreeSet<RootCauseCategory> = evidence.iter().filter_map(|e| e.implies).collect();
    if implied.len() > 2 {
        complexity = complexity.bump();
    }

    let confidence = clamp_unit(weighted_confidence(&evidence) * accuracy_scale(outlook.accuracy));
    let lead = &evidence[0];

    RootCauseAnalysisResult {
        issue_id: issue.id.clone(),
        root_cause: format!("{} ({})", lead.description, lead.evidence_type),
        confidence,
        evidence,
        category,
        complexity,
        degraded: false,
    }
}

/// Runs [`analyze_issue`] off the async workers under the analysis timeout.
pub struct RootCauseAnalyzer {
    learner: Arc<FixLearner>,
}

impl RootCauseAnalyzer {
    pub fn new(learner: Arc<FixLearner>) -> Self {
        Self { learner }
    }

    /// Never fails: timeouts and panics yield a degraded result.
    pub async fn analyze(&self, issue: &Issue, config: &AutoFixConfig) -> RootCauseAnalysisResult {
        let outlook = self.learner.outlook(issue.issue_type);
        let max_evidence = config.max_evidence;
        let owned = issue.clone();
        let task = tokio::task::spawn_blocking(move || analyze_issue(&owned, &outlook, max_evidence));

        match tokio::time::timeout(config.timeouts.analysis(), task).await {
            Ok(Ok(result)) => {
                tracing::debug!(
                    issue_id = %issue.id,
                    category = result.category.as_str(),
                    confidence = result.confidence,
                    evidence = result.evidence.len(),
                    "Root cause analysis complete"
                );
                result
            }
            Ok(Err(e)) => {
                tracing::error!(issue_id = %issue.id, error = %e, "Root cause analysis task failed");
                degraded_result(issue, "Analysis failed")
            }
            Err(_) => {
                tracing::warn!(issue_id = %issue.id, "Root cause analysis timed out");
                degraded_result(issue, "Analysis timed out")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::types::{IssueLocation, Severity};
    use std::collections::BTreeMap;

    pub(crate) fn issue(issue_type: IssueType, title: &str, context: serde_json::Value) -> Issue {
        let context: BTreeMap<String, serde_json::Value> = match context {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Issue {
            id: format!("iss-{}", title.len()),
            issue_type,
            severity: Severity::High,
            title: title.into(),
            description: String::new(),
            location: IssueLocation::default(),
            context,
            detected_at: chrono::Utc::now(),
            confidence: 0.95,
            tags: Default::default(),
            source: None,
        }
    }

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(patterns().len(), PATTERN_SOURCES.len());
    }

    #[test]
    fn test_ts2304_is_type_error() {
        let i = issue(
            IssueType::Compilation,
            "Cannot find name 'useState'",
            serde_json::json!({"errorCode": "TS2304"}),
        );
        let result = analyze_issue(&i, &TypeOutlook::default(), 5);
        assert_eq!(result.category, RootCauseCategory::TypeError);
        assert!(!result.degraded);
        assert!(result.confidence > 0.7 && result.confidence <= 1.0);
        assert_eq!(result.evidence[0].source, EvidenceSource::PatternMatch);
    }

    #[test]
    fn test_dependency_context_drives_category() {
        let i = issue(
            IssueType::Dependency,
            "npm install failed",
            serde_json::json!({"conflicts": ["react@17", "react@18"], "lockfileChanged": true}),
        );
        let result = analyze_issue(&i, &TypeOutlook::default(), 5);
        assert_eq!(result.category, RootCauseCategory::VersionConflict);
    }

    #[test]
    fn test_security_type_always_security_category() {
        let i = issue(IssueType::Security, "Cannot find module 'x'", serde_json::json!({}));
        let result = analyze_issue(&i, &TypeOutlook::default(), 5);
        assert_eq!(result.category, RootCauseCategory::SecurityVulnerability);
    }

    #[test]
    fn test_no_evidence_is_degraded() {
        let i = issue(IssueType::Runtime, "something odd", serde_json::json!({}));
        let result = analyze_issue(&i, &TypeOutlook::default(), 5);
        assert!(result.degraded);
        assert!(result.confidence <= DEGRADED_CONFIDENCE);
        assert_eq!(result.category, RootCauseCategory::LogicError);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn test_evidence_capped_and_ranked() {
        let mut i = issue(
            IssueType::Dependency,
            "ERESOLVE could not resolve dependency; Cannot find module 'left-pad' CVE-2020-1234",
            serde_json::json!({
                "missingDependency": "left-pad",
                "conflicts": ["a"],
                "vulnerable": true,
                "lockfileChanged": true,
                "errorCode": "ERESOLVE"
            }),
        );
        i.location.file = Some("package.json".into());
        let result = analyze_issue(&i, &TypeOutlook::default(), 3);
        assert_eq!(result.evidence.len(), 3);
        for pair in result.evidence.windows(2) {
            assert!(pair[0].weight >= pair[1].weight);
        }
    }

    #[test]
    fn test_history_scales_confidence() {
        let i = issue(IssueType::Lint, "Unexpected token", serde_json::json!({}));
        let neutral = analyze_issue(&i, &TypeOutlook::default(), 5);
        let trusted = analyze_issue(
            &i,
            &TypeOutlook {
                samples: 10,
                accuracy: 0.2,
                dominant_category: None,
            },
            5,
        );
        assert!(trusted.confidence < neutral.confidence);
        assert!(trusted
            .evidence
            .iter()
            .any(|e| e.source == EvidenceSource::HistoricalOutcome));
    }

    #[test]
    fn test_wide_spread_bumps_complexity() {
        let narrow = issue(IssueType::Lint, "Unexpected token", serde_json::json!({}));
        let wide = issue(
            IssueType::Lint,
            "Unexpected token",
            serde_json::json!({"affectedFiles": ["a", "b", "c", "d"]}),
        );
        let a = analyze_issue(&narrow, &TypeOutlook::default(), 5);
        let b = analyze_issue(&wide, &TypeOutlook::default(), 5);
        assert_eq!(a.complexity, Complexity::Simple);
        assert_eq!(b.complexity, Complexity::Moderate);
    }

    #[tokio::test]
    async fn test_analyzer_runs_under_timeout() {
        let analyzer = RootCauseAnalyzer::new(Arc::new(FixLearner::new()));
        let i = issue(IssueType::Compilation, "mismatched types", serde_json::json!({}));
        let result = analyzer.analyze(&i, &AutoFixConfig::default()).await;
        assert_eq!(result.category, RootCauseCategory::TypeError);
        assert_eq!(result.issue_id, i.id);
    }
}
