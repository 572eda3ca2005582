use rusqlite::{params, OptionalExtension};

use crate::db::models::MonitoringCounters;
use crate::db::DbPool;
use crate::error::AppError;

pub fn save(pool: &DbPool, counters: &MonitoringCounters) -> Result<(), AppError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO monitoring_counters
         (id, issues_detected, fixes_attempted, fixes_applied, total_fix_time_ms, last_success_at, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            issues_detected = excluded.issues_detected,
            fixes_attempted = excluded.fixes_attempted,
            fixes_applied = excluded.fixes_applied,
            total_fix_time_ms = excluded.total_fix_time_ms,
            last_success_at = excluded.last_success_at,
            updated_at = excluded.updated_at",
        params![
            counters.issues_detected as i64,
            counters.fixes_attempted as i64,
            counters.fixes_applied as i64,
            counters.total_fix_time_ms as i64,
            counters.last_success_at,
            now,
        ],
    )?;
    Ok(())
}

/// `None` on a fresh database.
pub fn load(pool: &DbPool) -> Result<Option<MonitoringCounters>, AppError> {
    let conn = pool.get()?;
    let counters = conn
        .query_row(
            "SELECT issues_detected, fixes_attempted, fixes_applied, total_fix_time_ms, last_success_at
             FROM monitoring_counters WHERE id = 1",
            [],
            |row| {
                Ok(MonitoringCounters {
                    issues_detected: row.get::<_, i64>(0)?.max(0) as u64,
                    fixes_attempted: row.get::<_, i64>(1)?.max(0) as u64,
                    fixes_applied: row.get::<_, i64>(2)?.max(0) as u64,
                    total_fix_time_ms: row.get::<_, i64>(3)?.max(0) as u64,
                    last_success_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_counters_upsert() {
        let pool = init_test_db().unwrap();
        assert!(load(&pool).unwrap().is_none());

        let mut counters = MonitoringCounters {
            issues_detected: 4,
            fixes_attempted: 2,
            fixes_applied: 1,
            total_fix_time_ms: 300,
            last_success_at: None,
        };
        save(&pool, &counters).unwrap();
        counters.fixes_applied = 2;
        counters.last_success_at = Some("2026-01-01T00:00:00+00:00".into());
        save(&pool, &counters).unwrap();

        let loaded = load(&pool).unwrap().unwrap();
        assert_eq!(loaded, counters);
        assert_eq!(loaded.success_rate(), 1.0);
        assert_eq!(loaded.average_fix_time_ms(), 150.0);
    }
}
