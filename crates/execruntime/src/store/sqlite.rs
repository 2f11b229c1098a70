use super::{parse_workflow, workflow_not_found};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execcore::{
    Context, Credential, CredentialStore, ExecutionRun, RunFailure, RunStatus, RunStore,
    StepStore, StoreError, WorkflowGraph, WorkflowStore,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Integrity(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Integrity(format!("Invalid timestamp '{}': {}", s, e)))
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path).map_err(backend)?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory().map_err(backend)?;
        Self::init_schema_sync(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> Result<(), StoreError> {
        // WAL must be set before any transaction begins
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error TEXT,
                error_detail TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                lease_owner TEXT,
                lease_until INTEGER
            );

            CREATE TABLE IF NOT EXISTS execution_steps (
                run_id TEXT NOT NULL,
                step TEXT NOT NULL,
                value TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (run_id, step)
            );

            CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id);
            "#,
        )
        .map_err(backend)
    }

    pub async fn journal_mode(&self) -> Result<String, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .map_err(backend)
    }

    pub async fn save_workflow(&self, workflow: &WorkflowGraph) -> Result<(), StoreError> {
        let definition = to_json(workflow)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflows (id, name, user_id, definition, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                user_id = excluded.user_id,
                definition = excluded.definition,
                updated_at = excluded.updated_at",
            params![
                workflow.id,
                workflow.name,
                workflow.user_id,
                definition,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(backend)?;
        Ok(())
    }

    pub async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO credentials (id, user_id, name, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                name = excluded.name,
                value = excluded.value",
            params![
                credential.id,
                credential.user_id,
                credential.name,
                credential.value
            ],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn finish(
        &self,
        sql: &str,
        run_id: &str,
        first: Option<String>,
        second: Option<String>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(sql, params![run_id, first, second, Utc::now().to_rfc3339()])
            .map_err(backend)?;
        Ok(changed > 0)
    }
}

struct RunRow {
    run_id: String,
    workflow_id: String,
    status: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    error_detail: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            workflow_id: row.get(1)?,
            status: row.get(2)?,
            input: row.get(3)?,
            output: row.get(4)?,
            error: row.get(5)?,
            error_detail: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<ExecutionRun, StoreError> {
        let parse_context = |s: &str| -> Result<Context, StoreError> {
            serde_json::from_str(s).map_err(|e| StoreError::Integrity(e.to_string()))
        };
        Ok(ExecutionRun {
            status: self.status.parse::<RunStatus>().map_err(StoreError::Integrity)?,
            input: parse_context(&self.input)?,
            output: self.output.as_deref().map(parse_context).transpose()?,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            error: self.error,
            error_detail: self.error_detail,
        })
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowGraph, StoreError> {
        let conn = self.conn.lock().await;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM workflows WHERE id = ?1",
                [workflow_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        drop(conn);

        match definition {
            Some(definition) => parse_workflow(&definition),
            None => Err(workflow_not_found(workflow_id)),
        }
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, run: &ExecutionRun) -> Result<bool, StoreError> {
        let input = to_json(&run.input)?;
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                "INSERT INTO executions (run_id, workflow_id, status, input, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(run_id) DO NOTHING",
                params![
                    run.run_id,
                    run.workflow_id,
                    run.status.as_str(),
                    input,
                    run.started_at.to_rfc3339(),
                ],
            )
            .map_err(backend)?;
        Ok(inserted > 0)
    }

    async fn mark_running(&self, run_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE executions SET status = 'RUNNING' WHERE run_id = ?1 AND status = 'PENDING'",
            [run_id],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn complete_run(&self, run_id: &str, output: &Context) -> Result<bool, StoreError> {
        self.finish(
            "UPDATE executions
             SET status = 'SUCCESS', output = ?2, error = ?3, completed_at = ?4
             WHERE run_id = ?1 AND status NOT IN ('SUCCESS', 'FAILED')",
            run_id,
            Some(to_json(output)?),
            None,
        )
        .await
    }

    async fn fail_run(&self, run_id: &str, failure: &RunFailure) -> Result<bool, StoreError> {
        self.finish(
            "UPDATE executions
             SET status = 'FAILED', error = ?2, error_detail = ?3, completed_at = ?4
             WHERE run_id = ?1 AND status NOT IN ('SUCCESS', 'FAILED')",
            run_id,
            Some(failure.message.clone()),
            Some(failure.detail.clone()),
        )
        .await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<ExecutionRun>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT run_id, workflow_id, status, input, output, error, error_detail, started_at, completed_at
                 FROM executions WHERE run_id = ?1",
                [run_id],
                RunRow::from_row,
            )
            .optional()
            .map_err(backend)?;
        drop(conn);

        row.map(RunRow::into_run).transpose()
    }

    async fn claim_run(
        &self,
        run_id: &str,
        owner: &str,
        until: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let claimed = conn
            .execute(
                "UPDATE executions SET lease_owner = ?2, lease_until = ?3
                 WHERE run_id = ?1
                   AND status NOT IN ('SUCCESS', 'FAILED')
                   AND (lease_owner IS NULL OR lease_owner = ?2 OR lease_until <= ?4)",
                params![
                    run_id,
                    owner,
                    until.timestamp_millis(),
                    Utc::now().timestamp_millis()
                ],
            )
            .map_err(backend)?;
        Ok(claimed > 0)
    }

    async fn prune_finished_steps(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(backend)?;

        let finished: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT run_id, completed_at FROM executions
                     WHERE status IN ('SUCCESS', 'FAILED') AND completed_at IS NOT NULL
                       AND EXISTS (SELECT 1 FROM execution_steps s WHERE s.run_id = executions.run_id)",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(backend)?;
            rows.collect::<Result<_, _>>().map_err(backend)?
        };

        let mut removed = 0;
        for (run_id, completed_at) in finished {
            if parse_timestamp(&completed_at)? < cutoff {
                removed += tx
                    .execute("DELETE FROM execution_steps WHERE run_id = ?1", [&run_id])
                    .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(removed)
    }
}

#[async_trait]
impl StepStore for SqliteStore {
    async fn load_step(&self, run_id: &str, step: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.conn.lock().await;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM execution_steps WHERE run_id = ?1 AND step = ?2",
                params![run_id, step],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        drop(conn);

        value
            .map(|v| serde_json::from_str(&v).map_err(|e| StoreError::Integrity(e.to_string())))
            .transpose()
    }

    async fn save_step(&self, run_id: &str, step: &str, value: &Value) -> Result<(), StoreError> {
        let value = to_json(value)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO execution_steps (run_id, step, value, completed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(run_id, step) DO UPDATE SET
                value = excluded.value,
                completed_at = excluded.completed_at",
            params![run_id, step, value, Utc::now().to_rfc3339()],
        )
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_credential(
        &self,
        credential_id: &str,
        user_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, user_id, name, value FROM credentials WHERE id = ?1 AND user_id = ?2",
            params![credential_id, user_id],
            |row| {
                Ok(Credential {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    value: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(backend)
    }
}
