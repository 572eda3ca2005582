use rusqlite::{params, Row};

use crate::db::models::FixHistoryRow;
use crate::db::DbPool;
use crate::engine::types::FixResult;
use crate::error::AppError;

fn row_to_history(row: &Row) -> rusqlite::Result<FixHistoryRow> {
    Ok(FixHistoryRow {
        seq: row.get("seq")?,
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        issue_type: row.get("issue_type")?,
        status: row.get("status")?,
        success: row.get::<_, i32>("success")? != 0,
        payload: row.get("payload")?,
        recorded_at: row.get("recorded_at")?,
    })
}

/// Append one terminal result and prune the table down to `cap` rows,
/// oldest first. Both happen in one transaction.
pub fn append(pool: &DbPool, result: &FixResult, cap: usize) -> Result<(), AppError> {
    let payload = serde_json::to_string(result)?;
    let now = chrono::Utc::now().to_rfc3339();

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO fix_history
         (id, issue_id, issue_type, status, success, payload, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            result.id,
            result.issue_id,
            result.issue_type.as_str(),
            result.status.as_str(),
            result.success as i32,
            payload,
            now,
        ],
    )?;
    let pruned = tx.execute(
        "DELETE FROM fix_history WHERE seq NOT IN
         (SELECT seq FROM fix_history ORDER BY seq DESC LIMIT ?1)",
        params![cap as i64],
    )?;
    tx.commit()?;

    if pruned > 0 {
        tracing::debug!(pruned, cap, "Pruned fix history");
    }
    Ok(())
}

/// Newest first.
pub fn recent_rows(pool: &DbPool, limit: usize) -> Result<Vec<FixHistoryRow>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM fix_history ORDER BY seq DESC LIMIT ?1")?;
    let rows = stmt.query_map(params![limit as i64], row_to_history)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Oldest first, ready to replay into the in-memory history.
/// Rows whose payload no longer deserializes are skipped.
pub fn load(pool: &DbPool, limit: usize) -> Result<Vec<FixResult>, AppError> {
    let mut rows = recent_rows(pool, limit)?;
    rows.reverse();
    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_str::<FixResult>(&row.payload) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(id = %row.id, error = %e, "Skipping unreadable fix history row");
                None
            }
        })
        .collect())
}

pub fn count(pool: &DbPool) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM fix_history", [], |row| row.get(0))?;
    Ok(n as usize)
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<FixResult, AppError> {
    let conn = pool.get()?;
    let payload: String = conn
        .query_row(
            "SELECT payload FROM fix_history WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("FixResult {id}")),
            other => AppError::Database(other),
        })?;
    Ok(serde_json::from_str(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::engine::analyzer::tests::issue;
    use crate::engine::types::{FixStatus, FixStrategy, IssueType, RiskLevel};

    fn result(n: usize) -> FixResult {
        let i = issue(IssueType::Lint, &"x".repeat(n + 1), serde_json::json!({}));
        let s = FixStrategy {
            id: format!("lint-autofix:{}", i.id),
            template_id: "lint-autofix".into(),
            name: "Run lint autofix".into(),
            description: String::new(),
            applicable_types: vec![IssueType::Lint],
            steps: vec![],
            risk_level: RiskLevel::Low,
            confidence: 0.9,
            estimated_time_ms: 1,
            prerequisites: vec![],
            rollback_steps: vec![],
            success_criteria: vec![],
            tags: Default::default(),
        };
        let mut r = FixResult::pending(&i, &s, None, 1);
        r.status = FixStatus::Applied;
        r.success = true;
        r
    }

    #[test]
    fn test_append_prunes_to_cap() {
        let pool = init_test_db().unwrap();
        let results: Vec<FixResult> = (0..5).map(result).collect();
        for r in &results {
            append(&pool, r, 3).unwrap();
        }
        assert_eq!(count(&pool).unwrap(), 3);

        let loaded = load(&pool, 10).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<&str> = results[2..].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(loaded[0], results[2]);
    }

    #[test]
    fn test_get_by_id_and_not_found() {
        let pool = init_test_db().unwrap();
        let r = result(0);
        append(&pool, &r, 10).unwrap();
        assert_eq!(get_by_id(&pool, &r.id).unwrap().issue_id, r.issue_id);
        let rows = recent_rows(&pool, 1).unwrap();
        assert_eq!(rows[0].status, "applied");
        assert!(rows[0].success);

        let err = get_by_id(&pool, "missing").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
