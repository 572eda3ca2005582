//! `autofix-daemon`: reads JSON-lines issue reports from stdin and runs the
//! remediation pipeline until EOF or Ctrl-C.
//!
//! Configuration comes from the TOML file named by `AUTOFIX_CONFIG`, if set.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use autofix_engine::engine::detector::ReportFileSource;
use autofix_engine::engine::executor::{RecordingExecutor, ShellStepExecutor, StepExecutor};
use autofix_engine::engine::predictive::GitChangeSource;
use autofix_engine::{db, logging, AppError, AutoFixConfig, AutoFixManager};

fn load_config() -> Result<AutoFixConfig, AppError> {
    match std::env::var_os("AUTOFIX_CONFIG") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            AutoFixConfig::from_toml_str(&raw)
        }
        None => Ok(AutoFixConfig::default()),
    }
}

#[tokio::main]
async fn main() {
    let json_logs = cfg!(feature = "json-logs") || std::env::var_os("AUTOFIX_LOG_JSON").is_some();
    logging::init(json_logs);

    if let Err(e) = run().await {
        tracing::error!(error = %e, kind = e.kind(), "autofix-daemon failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = load_config()?;
    let data_dir = config.data_dir();
    logging::install_crash_hook(&data_dir);
    tracing::info!("Starting autofix-daemon v{}", env!("CARGO_PKG_VERSION"));
    let crashes = logging::read_crash_logs(&data_dir);
    if let Some(latest) = crashes.first() {
        tracing::warn!(count = crashes.len(), latest = %latest.filename, "Previous crash reports found");
    }

    let pool = db::init_db(&data_dir)?;
    let workdir = std::env::current_dir()?;

    let executor: Arc<dyn StepExecutor> = if config.dry_run {
        tracing::info!("Dry run: fix steps are recorded, not executed");
        Arc::new(RecordingExecutor::new())
    } else {
        Arc::new(ShellStepExecutor::new(&workdir))
    };

    let mut builder = AutoFixManager::builder(config.clone())
        .executor(executor)
        .signal_source(Arc::new(GitChangeSource::new(&workdir)))
        .pool(pool)
        .workdir(&workdir);
    for path in &config.report_files {
        builder = builder.source(Arc::new(ReportFileSource::new(path)));
    }
    let manager = builder.build()?;
    manager.start_monitoring();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if let Some(issue) = manager.submit_json(&line) {
                        tracing::debug!(issue_id = %issue.id, "Report accepted");
                    }
                }
                Ok(None) => {
                    tracing::info!("Input closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read input");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    manager.shutdown().await;
    let status = manager.get_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
