// SQLite ResultRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, warn};
use turnstile_core::domain::{JobResult, OwnerId, ScoredCandidate};
use turnstile_core::error::{AppError, Result};
use turnstile_core::port::ResultRepository;

pub struct SqliteResultRepository {
    pool: SqlitePool,
}

impl SqliteResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for SqliteResultRepository {
    async fn save(&self, owner_id: &OwnerId, result: &JobResult) -> Result<()> {
        let results = serde_json::to_string(&result.results)?;

        // A request ID that ran twice (rejoined after completion) keeps its latest result
        sqlx::query(
            r#"
            INSERT INTO job_results (
                request_id, owner_id, results, total_generated,
                processing_time_ms, used_fallback, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(request_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                results = excluded.results,
                total_generated = excluded.total_generated,
                processing_time_ms = excluded.processing_time_ms,
                used_fallback = excluded.used_fallback,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&result.request_id)
        .bind(owner_id)
        .bind(results)
        .bind(result.total_generated as i64)
        .bind(result.processing_time_ms as i64)
        .bind(result.used_fallback)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(request_id = %result.request_id, owner_id = %owner_id, "Job result saved");
        Ok(())
    }

    async fn find_by_owner(&self, owner_id: &OwnerId, limit: u32) -> Result<Vec<JobResult>> {
        let rows = sqlx::query_as::<_, JobResultRow>(
            r#"
            SELECT * FROM job_results
            WHERE owner_id = ?
            ORDER BY completed_at DESC, request_id
            LIMIT ?
            "#,
        )
        .bind(owner_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobResultRow::into_result).collect()
    }

    async fn prune_before(&self, cutoff_millis: i64) -> Result<u64> {
        let pruned = sqlx::query("DELETE FROM job_results WHERE completed_at < ?")
            .bind(cutoff_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        if pruned > 0 {
            debug!(pruned, cutoff_millis, "Old job results pruned");
        }
        Ok(pruned)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobResultRow {
    request_id: String,
    owner_id: String,
    results: String,
    total_generated: i64,
    processing_time_ms: i64,
    used_fallback: bool,
    completed_at: i64,
}

impl JobResultRow {
    fn into_result(self) -> Result<JobResult> {
        let results: Vec<ScoredCandidate> = serde_json::from_str(&self.results).map_err(|e| {
            warn!(request_id = %self.request_id, error = %e, "Corrupt results column");
            AppError::Persistence(format!("Corrupt result {}: {}", self.request_id, e))
        })?;

        Ok(JobResult {
            request_id: self.request_id,
            owner_id: self.owner_id,
            results,
            total_generated: self.total_generated.max(0) as usize,
            processing_time_ms: self.processing_time_ms.max(0) as u64,
            used_fallback: self.used_fallback,
            completed_at: self.completed_at,
        })
    }
}
