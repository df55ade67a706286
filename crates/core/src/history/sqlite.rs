//! SQLite-backed deployment history store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::store::{DeployHistoryStore, HistoryError};
use super::types::DeploySummary;

/// SQLite-backed deployment history.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    /// Open (or create) the history database at the given path.
    pub fn new(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path).map_err(|e| HistoryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory history store (useful for testing).
    pub fn in_memory() -> Result<Self, HistoryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| HistoryError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), HistoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deploy_summaries (
                job_id TEXT PRIMARY KEY,
                deployment_id TEXT NOT NULL,
                server_id TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                summary TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_summaries_deployment
                ON deploy_summaries(deployment_id, finished_at DESC);
            "#,
        )
        .map_err(|e| HistoryError::Database(e.to_string()))?;
        Ok(())
    }
}

impl DeployHistoryStore for SqliteHistoryStore {
    fn append(&self, summary: &DeploySummary) -> Result<(), HistoryError> {
        let json = serde_json::to_string(summary)
            .map_err(|e| HistoryError::Corrupt(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO deploy_summaries (job_id, deployment_id, server_id, finished_at, summary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                summary.job_id,
                summary.deployment_id,
                summary.server_id,
                summary.finished_at.to_rfc3339(),
                json
            ],
        )
        .map_err(|e| HistoryError::Database(e.to_string()))?;
        Ok(())
    }

    fn for_deployment(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> Result<Vec<DeploySummary>, HistoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT summary FROM deploy_summaries
                 WHERE deployment_id = ?1
                 ORDER BY finished_at DESC
                 LIMIT ?2",
            )
            .map_err(|e| HistoryError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![deployment_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| HistoryError::Database(e.to_string()))?;

        let mut summaries = Vec::new();
        for row in rows {
            let json = row.map_err(|e| HistoryError::Database(e.to_string()))?;
            summaries.push(
                serde_json::from_str(&json).map_err(|e| HistoryError::Corrupt(e.to_string()))?,
            );
        }
        Ok(summaries)
    }

    fn latest(&self, deployment_id: &str) -> Result<Option<DeploySummary>, HistoryError> {
        Ok(self.for_deployment(deployment_id, 1)?.into_iter().next())
    }
}
