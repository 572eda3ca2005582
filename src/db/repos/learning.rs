use rusqlite::params;

use crate::db::DbPool;
use crate::engine::learner::{LearnerSnapshot, StrategyRecord, TypeRecord};
use crate::error::AppError;

const SCOPE_STRATEGY: &str = "strategy";
const SCOPE_TYPE: &str = "type";

/// Replace the stored statistics with `snapshot`.
pub fn save_snapshot(pool: &DbPool, snapshot: &LearnerSnapshot) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM learning_stats", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO learning_stats (scope, key, payload, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for record in &snapshot.strategies {
            let key = format!("{}|{}", record.template_id, record.issue_type.as_str());
            stmt.execute(params![SCOPE_STRATEGY, key, serde_json::to_string(record)?, now])?;
        }
        for record in &snapshot.types {
            stmt.execute(params![
                SCOPE_TYPE,
                record.issue_type.as_str(),
                serde_json::to_string(record)?,
                now
            ])?;
        }
    }
    tx.commit()?;
    tracing::debug!(
        strategies = snapshot.strategies.len(),
        types = snapshot.types.len(),
        "Saved learner snapshot"
    );
    Ok(())
}

pub fn load_snapshot(pool: &DbPool) -> Result<LearnerSnapshot, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT scope, key, payload FROM learning_stats ORDER BY scope, key")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut snapshot = LearnerSnapshot::default();
    for (scope, key, payload) in rows.filter_map(|r| r.ok()) {
        let parsed = match scope.as_str() {
            SCOPE_STRATEGY => serde_json::from_str::<StrategyRecord>(&payload)
                .map(|r| snapshot.strategies.push(r)),
            SCOPE_TYPE => serde_json::from_str::<TypeRecord>(&payload).map(|r| snapshot.types.push(r)),
            _ => Ok(()),
        };
        if let Err(e) = parsed {
            tracing::warn!(scope = %scope, key = %key, error = %e, "Skipping unreadable learning row");
        }
    }
    Ok(snapshot)
}
