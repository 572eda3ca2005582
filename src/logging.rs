use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Global crash log directory, set during init.
static CRASH_LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

const DEFAULT_FILTER: &str = "info,autofix_engine=debug";

/// Initialize tracing on stderr. Stdout is left to the daemon's JSON output.
///
/// - `json = false`: compact human-readable lines
/// - `json = true`: one JSON object per event, for log shippers
/// - Default level: INFO, override via RUST_LOG env
pub fn init(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
    };

    // A subscriber may already be set (tests, embedding applications)
    if installed.is_ok() {
        tracing::debug!(json, "Tracing initialized");
    }
}

/// Install a panic hook that writes crash details to a file.
/// Must be called after the data directory is known.
pub fn install_crash_hook(data_dir: &Path) {
    let crash_dir = data_dir.join("crash_logs");
    let _ = std::fs::create_dir_all(&crash_dir);
    if CRASH_LOG_DIR.set(crash_dir).is_err() {
        return;
    }

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(dir) = CRASH_LOG_DIR.get() {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            let path = dir.join(format!("crash_{}.log", timestamp));

            let mut report = String::new();
            report.push_str(&format!(
                "=== AUTOFIX CRASH REPORT ===\n\
                 Time: {}\n\
                 Version: {}\n\n",
                chrono::Local::now().to_rfc3339(),
                env!("CARGO_PKG_VERSION"),
            ));

            if let Some(msg) = info.payload().downcast_ref::<&str>() {
                report.push_str(&format!("Panic: {}\n", msg));
            } else if let Some(msg) = info.payload().downcast_ref::<String>() {
                report.push_str(&format!("Panic: {}\n", msg));
            } else {
                report.push_str("Panic: <unknown payload>\n");
            }

            if let Some(loc) = info.location() {
                report.push_str(&format!("Location: {}:{}:{}\n", loc.file(), loc.line(), loc.column()));
            }

            report.push_str(&format!("\nBacktrace:\n{}\n", std::backtrace::Backtrace::force_capture()));

            let thread = std::thread::current();
            report.push_str(&format!("\nThread: {:?} (id: {:?})\n", thread.name(), thread.id()));

            let _ = std::fs::write(&path, &report);
            eprintln!("[CRASH] Report written to: {}", path.display());
        }

        prev_hook(info);
    }));

    tracing::info!("Crash hook installed");
}

/// Crash reports on disk, newest first, at most 10.
pub fn read_crash_logs(data_dir: &Path) -> Vec<CrashLogEntry> {
    let crash_dir = data_dir.join("crash_logs");
    let mut entries = Vec::new();

    if let Ok(dir) = std::fs::read_dir(&crash_dir) {
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "log").unwrap_or(false) {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    entries.push(CrashLogEntry {
                        filename: path.file_name().unwrap_or_default().to_string_lossy().into(),
                        content,
                    });
                }
            }
        }
    }

    // Filenames carry the timestamp
    entries.sort_by(|a, b| b.filename.cmp(&a.filename));
    entries.truncate(10);
    entries
}

#[derive(serde::Serialize, Clone, Debug)]
pub struct CrashLogEntry {
    pub filename: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_logs_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let crash_dir = dir.path().join("crash_logs");
        std::fs::create_dir_all(&crash_dir).unwrap();
        std::fs::write(crash_dir.join("crash_20260101_000000.log"), "old").unwrap();
        std::fs::write(crash_dir.join("crash_20260102_000000.log"), "new").unwrap();
        std::fs::write(crash_dir.join("notes.txt"), "ignored").unwrap();

        let logs = read_crash_logs(dir.path());
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].content, "new");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
