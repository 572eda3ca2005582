use rusqlite::Connection;

use crate::error::AppError;

/// Run the idempotent schema migration.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Fix history (capped, oldest rows pruned first)
-- ============================================================================

CREATE TABLE IF NOT EXISTS fix_history (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL UNIQUE,
    issue_id     TEXT NOT NULL,
    issue_type   TEXT NOT NULL,
    status       TEXT NOT NULL,
    success      INTEGER NOT NULL DEFAULT 0,
    payload      TEXT NOT NULL,
    recorded_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fix_history_issue ON fix_history(issue_id);

-- ============================================================================
-- Monitoring counters (single row)
-- ============================================================================

CREATE TABLE IF NOT EXISTS monitoring_counters (
    id                INTEGER PRIMARY KEY CHECK (id = 1),
    issues_detected   INTEGER NOT NULL DEFAULT 0,
    fixes_attempted   INTEGER NOT NULL DEFAULT 0,
    fixes_applied     INTEGER NOT NULL DEFAULT 0,
    total_fix_time_ms INTEGER NOT NULL DEFAULT 0,
    last_success_at   TEXT,
    updated_at        TEXT NOT NULL
);

-- ============================================================================
-- Learner statistics
-- ============================================================================

CREATE TABLE IF NOT EXISTS learning_stats (
    scope        TEXT NOT NULL,
    key          TEXT NOT NULL,
    payload      TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (scope, key)
);

-- ============================================================================
-- Prediction model accuracy
-- ============================================================================

CREATE TABLE IF NOT EXISTS prediction_accuracy (
    issue_type   TEXT PRIMARY KEY,
    accuracy     REAL NOT NULL,
    updated_at   TEXT NOT NULL
);
"#;
