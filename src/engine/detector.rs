//! Normalizes raw tool reports into [`Issue`] records with stable ids.
//!
//! The detector owns the active-issue set. Issues leave it only when a source
//! stops reporting them ([`IssueDetector::reconcile`]) or a validated fix
//! resolves them ([`IssueDetector::resolve`]).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::bus::{AutoFixEvent, EventBus};
use super::rate_limiter::RateLimiter;
use super::types::{Issue, IssueLocation, IssueType, Severity};
use crate::error::AppError;
use crate::validation::clamp_unit;

/// Source name used when a report arrives without one (stdin, API).
pub const DIRECT_SOURCE: &str = "direct";

/// Wire shape produced by external build/test/lint/audit tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    #[serde(rename = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Explicit fingerprint; wins over error code and message.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Why a report was dropped. Never surfaced past the detector.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("malformed report: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown issue type '{0}'")]
    UnknownType(String),
    #[error("report has neither title nor message")]
    MissingTitle,
    #[error("source '{source_name}' rate limited, retry in {retry_after:?}")]
    RateLimited {
        source_name: String,
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    /// First sighting; `issue:detected` was published.
    New(Issue),
    /// Same underlying problem seen again; the stored issue was refreshed.
    Refreshed(Issue),
}

impl Ingested {
    pub fn issue(&self) -> &Issue {
        match self {
            Ingested::New(issue) | Ingested::Refreshed(issue) => issue,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Ingested::New(_))
    }
}

/// Collaborator seam: anything that can be polled for reports.
#[async_trait::async_trait]
pub trait DetectionSource: Send + Sync {
    fn name(&self) -> &str;

    /// One full snapshot of what the tool currently reports.
    async fn poll(&self) -> Result<Vec<IssueReport>, AppError>;
}

// =============================================================================
// Normalization (pure)
// =============================================================================

/// Lowercase, strip digits, collapse whitespace. Line numbers and counters in
/// messages must not change the fingerprint.
pub fn normalize_signature(message: &str) -> String {
    let stripped: String = message
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `iss-` + first 16 hex chars of `sha256(type|file|line|signature)`.
pub fn stable_issue_id(
    issue_type: IssueType,
    file: Option<&str>,
    line: Option<u32>,
    signature: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issue_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(file.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(line.map(|l| l.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(signature.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("iss-{}", &digest[..16])
}

fn report_signature(report: &IssueReport) -> String {
    if let Some(sig) = report.signature.as_deref().filter(|s| !s.trim().is_empty()) {
        return sig.trim().to_string();
    }
    if let Some(code) = report.error_code.as_deref().filter(|s| !s.trim().is_empty()) {
        return code.trim().to_string();
    }
    let text = report
        .message
        .as_deref()
        .or(report.title.as_deref())
        .unwrap_or("");
    normalize_signature(text)
}

/// Severity when the report does not carry one.
pub fn infer_severity(issue_type: IssueType, context: &BTreeMap<String, serde_json::Value>) -> Severity {
    let flag = |key: &str| context.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
    match issue_type {
        IssueType::Security | IssueType::Compilation => Severity::High,
        IssueType::Dependency if flag("vulnerable") => Severity::High,
        IssueType::Test | IssueType::Runtime | IssueType::Dependency => Severity::Medium,
        IssueType::Performance | IssueType::Configuration => Severity::Medium,
        IssueType::Lint => Severity::Low,
    }
}

/// Turn a report into an issue. Pure apart from the detection timestamp.
pub fn normalize_report(report: &IssueReport, source: &str) -> Result<Issue, DetectionError> {
    let issue_type = IssueType::parse(&report.issue_type)
        .ok_or_else(|| DetectionError::UnknownType(report.issue_type.clone()))?;

    let title = report
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            report
                .message
                .as_deref()
                .and_then(|m| m.lines().find(|l| !l.trim().is_empty()))
        })
        .map(|t| t.trim().to_string())
        .ok_or(DetectionError::MissingTitle)?;

    let mut context = report.context.clone();
    if let Some(code) = &report.error_code {
        context
            .entry("errorCode".to_string())
            .or_insert_with(|| serde_json::Value::String(code.clone()));
    }

    let severity = report
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .unwrap_or_else(|| infer_severity(issue_type, &context));

    let signature = report_signature(report);
    let id = stable_issue_id(issue_type, report.file.as_deref(), report.line, &signature);

    let mut tags: BTreeSet<String> = report.tags.iter().map(|t| t.trim().to_string()).collect();
    tags.retain(|t| !t.is_empty());
    tags.insert(issue_type.as_str().to_string());

    Ok(Issue {
        id,
        issue_type,
        severity,
        title,
        description: report.message.clone().unwrap_or_default(),
        location: IssueLocation {
            file: report.file.clone(),
            line: report.line,
            column: report.column,
            function: report.function.clone(),
        },
        context,
        detected_at: Utc::now(),
        confidence: clamp_unit(report.confidence.unwrap_or(1.0)),
        tags,
        source: Some(report.source.clone().unwrap_or_else(|| source.to_string())),
    })
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Default)]
struct DetectorState {
    active: HashMap<String, Issue>,
    /// source name -> ids it currently reports
    by_source: HashMap<String, HashSet<String>>,
}

pub struct IssueDetector {
    state: Mutex<DetectorState>,
    sources: Mutex<Vec<Arc<dyn DetectionSource>>>,
    limiter: RateLimiter,
    bus: EventBus,
    dropped: AtomicU64,
}

impl IssueDetector {
    pub fn new(bus: EventBus) -> Self {
        Self::with_limiter(bus, RateLimiter::default())
    }

    pub fn with_limiter(bus: EventBus, limiter: RateLimiter) -> Self {
        Self {
            state: Mutex::new(DetectorState::default()),
            sources: Mutex::new(Vec::new()),
            limiter,
            bus,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn add_source(&self, source: Arc<dyn DetectionSource>) {
        tracing::info!(source = source.name(), "Registered detection source");
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(source);
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Reports dropped as malformed, unknown or rate limited.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drop_report(&self, err: DetectionError) -> Option<Ingested> {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "Dropping issue report");
        None
    }

    /// Normalize and store a report. Dropped reports yield `None`.
    pub fn ingest(&self, report: IssueReport) -> Option<Ingested> {
        let source = report.source.clone().unwrap_or_else(|| DIRECT_SOURCE.to_string());
        self.ingest_from(&source, report)
    }

    /// Parse one raw JSON report (a line of JSONL) and ingest it.
    pub fn ingest_json(&self, raw: &str) -> Option<Ingested> {
        match serde_json::from_str::<IssueReport>(raw) {
            Ok(report) => self.ingest(report),
            Err(e) => self.drop_report(DetectionError::Malformed(e)),
        }
    }

    fn ingest_from(&self, source: &str, report: IssueReport) -> Option<Ingested> {
        if let Err(retry_after) = self.limiter.check(source) {
            return self.drop_report(DetectionError::RateLimited {
                source_name: source.to_string(),
                retry_after,
            });
        }
        self.store(source, report)
    }

    fn store(&self, source: &str, report: IssueReport) -> Option<Ingested> {
        let issue = match normalize_report(&report, source) {
            Ok(issue) => issue,
            Err(e) => return self.drop_report(e),
        };

        let outcome = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .by_source
                .entry(source.to_string())
                .or_default()
                .insert(issue.id.clone());

            match state.active.get_mut(&issue.id) {
                Some(existing) => {
                    existing.severity = issue.severity;
                    existing.title = issue.title;
                    existing.description = issue.description;
                    existing.location = issue.location;
                    existing.context = issue.context;
                    existing.confidence = issue.confidence;
                    existing.tags.extend(issue.tags);
                    Ingested::Refreshed(existing.clone())
                }
                None => {
                    state.active.insert(issue.id.clone(), issue.clone());
                    Ingested::New(issue)
                }
            }
        };

        if let Ingested::New(issue) = &outcome {
            tracing::info!(
                issue_id = %issue.id,
                issue_type = %issue.issue_type,
                severity = ?issue.severity,
                source = source,
                "Issue detected"
            );
            self.bus.publish(AutoFixEvent::IssueDetected(issue.clone()));
        }
        Some(outcome)
    }

    /// Remove from the active set. Returns false if it was not active.
    pub fn resolve(&self, issue_id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            for ids in state.by_source.values_mut() {
                ids.remove(issue_id);
            }
            state.active.remove(issue_id).is_some()
        };
        if removed {
            tracing::info!(issue_id, "Issue resolved");
            self.bus.publish(AutoFixEvent::IssueResolved {
                issue_id: issue_id.to_string(),
            });
        }
        removed
    }

    /// After a full poll of `source`, resolve what it stopped reporting.
    /// Issues still reported by another source stay active.
    pub fn reconcile(&self, source: &str, seen: &HashSet<String>) -> Vec<String> {
        let gone: Vec<String> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let previous = state.by_source.insert(source.to_string(), seen.clone()).unwrap_or_default();
            previous
                .difference(seen)
                .filter(|id| !state.by_source.values().any(|ids| ids.contains(*id)))
                .cloned()
                .collect()
        };
        for id in &gone {
            self.resolve(id);
        }
        gone
    }

    pub fn get(&self, issue_id: &str) -> Option<Issue> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .get(issue_id)
            .cloned()
    }

    pub fn is_active(&self, issue_id: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .contains_key(issue_id)
    }

    /// Active issues, most severe first, then oldest first.
    pub fn active_issues(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .values()
            .cloned()
            .collect();
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.detected_at.cmp(&b.detected_at))
                .then(a.id.cmp(&b.id))
        });
        issues
    }

    fn find_source(&self, name: &str) -> Option<Arc<dyn DetectionSource>> {
        self.sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Poll every registered source once, each bounded by `timeout`.
    /// Returns the issues seen for the first time.
    pub async fn poll_sources(&self, timeout: Duration) -> Vec<Issue> {
        let sources: Vec<Arc<dyn DetectionSource>> =
            self.sources.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let mut fresh = Vec::new();

        for source in sources {
            let name = source.name().to_string();
            let reports = match tokio::time::timeout(timeout, source.poll()).await {
                Ok(Ok(reports)) => reports,
                Ok(Err(e)) => {
                    tracing::warn!(source = %name, error = %e, "Detection source poll failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(source = %name, timeout_ms = timeout.as_millis() as u64, "Detection source poll timed out");
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let mut limited = 0usize;
            for report in reports {
                if let Err(retry_after) = self.limiter.check(&name) {
                    // Still reported, only not refreshed this round
                    if let Ok(issue) = normalize_report(&report, &name) {
                        if self.is_active(&issue.id) {
                            seen.insert(issue.id);
                        }
                    }
                    limited += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(source = %name, retry_after_ms = retry_after.as_millis() as u64, "Report rate limited");
                    continue;
                }
                if let Some(outcome) = self.store(&name, report) {
                    seen.insert(outcome.issue().id.clone());
                    if let Ingested::New(issue) = outcome {
                        fresh.push(issue);
                    }
                }
            }
            if limited > 0 {
                tracing::warn!(source = %name, limited, "Detection source over its rate limit");
            }
            let resolved = self.reconcile(&name, &seen);
            tracing::debug!(source = %name, seen = seen.len(), resolved = resolved.len(), "Polled detection source");
        }

        self.limiter.prune();
        fresh
    }

    /// Re-poll the issue's own source. `None` when there is no pollable source
    /// for it, or the poll failed.
    pub async fn reproduces(&self, issue: &Issue, timeout: Duration) -> Option<bool> {
        let source = self.find_source(issue.source.as_deref()?)?;
        match tokio::time::timeout(timeout, source.poll()).await {
            Ok(Ok(reports)) => Some(reports.iter().any(|r| {
                normalize_report(r, source.name())
                    .map(|i| i.id == issue.id)
                    .unwrap_or(false)
            })),
            Ok(Err(e)) => {
                tracing::warn!(issue_id = %issue.id, error = %e, "Re-detection poll failed");
                None
            }
            Err(_) => None,
        }
    }
}

// =============================================================================
// Report files
// =============================================================================

/// Reads a JSON array or JSON-lines report written by an external tool.
/// A missing file means the tool currently reports nothing.
pub struct ReportFileSource {
    name: String,
    path: PathBuf,
}

impl ReportFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!(
            "file:{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        );
        Self { name, path }
    }
}

pub fn parse_report_document(content: &str) -> Result<Vec<IssueReport>, AppError> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut reports = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IssueReport>(line) {
            Ok(report) => reports.push(report),
            Err(e) => tracing::warn!(line = idx + 1, error = %e, "Skipping malformed report line"),
        }
    }
    Ok(reports)
}

#[async_trait::async_trait]
impl DetectionSource for ReportFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Result<Vec<IssueReport>, AppError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_report_document(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
