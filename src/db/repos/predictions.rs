use rusqlite::params;

use crate::db::models::PredictionAccuracyRow;
use crate::db::DbPool;
use crate::error::AppError;

pub fn upsert_accuracy(pool: &DbPool, issue_type: &str, accuracy: f64) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO prediction_accuracy (issue_type, accuracy, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(issue_type) DO UPDATE SET
            accuracy = excluded.accuracy,
            updated_at = excluded.updated_at",
        params![issue_type, accuracy, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn get_all(pool: &DbPool) -> Result<Vec<PredictionAccuracyRow>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT issue_type, accuracy, updated_at FROM prediction_accuracy ORDER BY issue_type",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(PredictionAccuracyRow {
            issue_type: row.get(0)?,
            accuracy: row.get(1)?,
            updated_at: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_accuracy_upsert() {
        let pool = init_test_db().unwrap();
        upsert_accuracy(&pool, "dependency", 0.7).unwrap();
        upsert_accuracy(&pool, "compilation", 0.6).unwrap();
        upsert_accuracy(&pool, "dependency", 0.76).unwrap();

        let rows = get_all(&pool).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].issue_type, "compilation");
        assert_eq!(rows[1].accuracy, 0.76);
    }
}
