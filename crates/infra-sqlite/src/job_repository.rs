// SQLite JobRepository Implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use workgate_core::domain::{Job, JobId, JobState, Outcome, RequestMode, WorkPayload};
use workgate_core::error::{AppError, Result};
use workgate_core::port::{JobFilter, JobPage, JobRepository, StoreMetrics};

const COLUMNS: &str = "id, mode, payload, callback_url, state, result, error, attempts, \
     delivery_attempts, delivery_error, client_ip, created_at, started_at, completed_at, delivered_at";

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" => AppError::Database(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

fn outcome_columns(outcome: &Outcome) -> Result<(Option<String>, Option<String>)> {
    Ok(match outcome {
        Outcome::Pending => (None, None),
        Outcome::Succeeded(value) => (Some(serde_json::to_string(value)?), None),
        Outcome::Failed(error) => (None, Some(error.clone())),
    })
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn current_state(&self, id: &JobId) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT state FROM requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn save(&self, job: &Job) -> Result<()> {
        let (result, error) = outcome_columns(&job.outcome)?;

        sqlx::query(
            r#"
            INSERT INTO requests (
                id, mode, operation, complexity, payload, callback_url,
                state, result, error,
                attempts, delivery_attempts, delivery_error,
                client_ip, created_at, started_at, completed_at, delivered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.mode.as_str())
        .bind(job.payload.operation.as_str())
        .bind(job.payload.complexity.level() as i64)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(&job.callback_url)
        .bind(job.state.as_str())
        .bind(result)
        .bind(error)
        .bind(job.attempts as i64)
        .bind(job.delivery_attempts as i64)
        .bind(&job.delivery_error)
        .bind(&job.client_ip)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.delivered_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_state(
        &self,
        id: &JobId,
        state: JobState,
        outcome: Option<&Outcome>,
        at_millis: i64,
    ) -> Result<()> {
        let predecessors = state.predecessors();
        if predecessors.is_empty() {
            return Err(AppError::InvalidState(format!(
                "Job {} cannot move to {}",
                id, state
            )));
        }

        // Only the columns that belong to the target state change
        let (assignments, outcome_cols) = match (state, outcome) {
            (JobState::Running, _) => ("started_at = ?, attempts = attempts + 1", None),
            (JobState::Succeeded | JobState::Failed, Some(outcome)) => (
                "result = ?, error = ?, completed_at = ?",
                Some(outcome_columns(outcome)?),
            ),
            (JobState::Succeeded | JobState::Failed, None) => ("completed_at = ?", None),
            (JobState::Delivered | JobState::DeliveryFailed, _) => ("delivered_at = ?", None),
            (JobState::Queued | JobState::Delivering, _) => ("", None),
        };

        // Conditional update: the stored state must be a legal predecessor
        let placeholders = vec!["?"; predecessors.len()].join(", ");
        let set_clause = if assignments.is_empty() {
            "state = ?".to_string()
        } else {
            format!("state = ?, {}", assignments)
        };
        let sql = format!(
            "UPDATE requests SET {} WHERE id = ? AND state IN ({})",
            set_clause, placeholders
        );

        let mut query = sqlx::query(&sql).bind(state.as_str());
        if let Some((result, error)) = outcome_cols {
            query = query.bind(result).bind(error);
        }
        if !assignments.is_empty() {
            query = query.bind(at_millis);
        }
        query = query.bind(id);
        for predecessor in predecessors {
            query = query.bind(predecessor.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            match self.current_state(id).await? {
                None => Err(AppError::NotFound(format!("Job {} not found", id))),
                Some(current) => Err(AppError::InvalidState(format!(
                    "Cannot update job {} from {} to {}",
                    id, current, state
                ))),
            }
        } else {
            Ok(())
        }
    }

    async fn record_delivery_attempt(
        &self,
        id: &JobId,
        delivery_attempts: u32,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE requests
            SET delivery_attempts = ?, delivery_error = ?
            WHERE id = ?
            "#,
        )
        .bind(delivery_attempts as i64)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", id)));
        }
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM requests WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage> {
        let filter = filter.clone().normalized();
        let mode = filter.mode.map(|m| m.as_str());
        let state = filter.state.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM requests
            WHERE (? IS NULL OR mode = ?) AND (? IS NULL OR state = ?)
            "#,
        )
        .bind(mode)
        .bind(mode)
        .bind(state)
        .bind(state)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM requests
            WHERE (? IS NULL OR mode = ?) AND (? IS NULL OR state = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            COLUMNS
        ))
        .bind(mode)
        .bind(mode)
        .bind(state)
        .bind(state)
        .bind(filter.limit as i64)
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(JobPage {
            total,
            limit: filter.limit,
            offset: filter.offset,
            jobs: rows
                .into_iter()
                .map(JobRow::into_job)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM requests
            WHERE state = ?
            ORDER BY created_at ASC
            "#,
            COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn metrics(&self) -> Result<StoreMetrics> {
        let by_mode: Vec<(String, i64)> =
            sqlx::query_as("SELECT mode, COUNT(*) FROM requests GROUP BY mode")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let by_state: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM requests GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let latency: Vec<(String, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT mode, AVG(completed_at - started_at) FROM requests
            WHERE started_at IS NOT NULL AND completed_at IS NOT NULL
            GROUP BY mode
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let by_mode: HashMap<String, i64> = by_mode.into_iter().collect();
        Ok(StoreMetrics {
            total: by_mode.values().sum(),
            by_mode,
            by_state: by_state.into_iter().collect(),
            avg_execution_time_ms: latency
                .into_iter()
                .filter_map(|(mode, avg)| avg.map(|avg| (mode, avg)))
                .collect(),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    mode: String,
    payload: String,
    callback_url: Option<String>,
    state: String,
    result: Option<String>,
    error: Option<String>,
    attempts: i64,
    delivery_attempts: i64,
    delivery_error: Option<String>,
    client_ip: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    delivered_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let corrupt = |what: &str, detail: String| {
            AppError::Database(format!("Corrupt row {} ({}): {}", self.id, what, detail))
        };

        let mode: RequestMode = self
            .mode
            .parse()
            .map_err(|e: workgate_core::domain::DomainError| corrupt("mode", e.to_string()))?;
        let state: JobState = self
            .state
            .parse()
            .map_err(|e: workgate_core::domain::DomainError| corrupt("state", e.to_string()))?;
        let payload: WorkPayload = serde_json::from_str(&self.payload)
            .map_err(|e| corrupt("payload", e.to_string()))?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt("result", e.to_string()))?;

        Ok(Job {
            mode,
            payload,
            callback_url: self.callback_url,
            state,
            outcome: Outcome::from_parts(result, self.error),
            attempts: self.attempts as u32,
            delivery_attempts: self.delivery_attempts as u32,
            delivery_error: self.delivery_error,
            client_ip: self.client_ip,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            delivered_at: self.delivered_at,
            id: self.id,
        })
    }
}
