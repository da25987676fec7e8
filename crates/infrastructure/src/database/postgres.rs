use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use jobqueue_core::errors::{Result, SchedulerError};
use jobqueue_core::models::{
    Job, JobFilter, JobPatch, JobSpec, JobStats, JobStatus, RecoveryReport,
};
use jobqueue_core::traits::JobStore;

/// 单页查询的任务数上限
const MAX_PAGE_SIZE: i64 = 100;

/// PostgreSQL任务存储实现
///
/// 所有状态变更通过带状态前置条件的UPDATE实现比较并交换，
/// 同一任务的并发转移由数据库的行级原子性串行化。
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 连接数据库并初始化表结构
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        info!("任务存储初始化完成");
        Ok(store)
    }

    /// 建表与索引，可重复执行
    async fn run_migrations(&self) -> Result<()> {
        debug!("执行数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                job_type VARCHAR(50) NOT NULL,
                payload JSONB NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 5,
                estimated_duration DOUBLE PRECISION NOT NULL DEFAULT 1.0,
                status VARCHAR(20) NOT NULL DEFAULT 'PENDING',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                result JSONB,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                scheduled_at TIMESTAMPTZ,
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_created_at ON jobs(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_job_type ON jobs(job_type)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            priority: row.try_get("priority")?,
            estimated_duration: row.try_get("estimated_duration")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, spec: &JobSpec) -> Result<Job> {
        spec.validate()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            job_type: spec.job_type.clone(),
            payload: spec.payload.clone(),
            priority: spec.priority,
            estimated_duration: spec.estimated_duration,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, job_type, payload, priority, estimated_duration,
                status, retry_count, max_retries, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.estimated_duration)
        .bind(job.status)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("创建任务: id={}, type={}", job.id, job.job_type);
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list(
        &self,
        filter: &JobFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Job>, i64)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let mut clauses = Vec::new();
        let mut next_param = 1;
        if filter.status.is_some() {
            clauses.push(format!("status = ${next_param}"));
            next_param += 1;
        }
        if filter.job_type.is_some() {
            clauses.push(format!("job_type = ${next_param}"));
            next_param += 1;
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs{where_sql}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
        }
        if let Some(job_type) = &filter.job_type {
            count_query = count_query.bind(job_type);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let page_sql = format!(
            "SELECT * FROM jobs{where_sql} ORDER BY created_at DESC \
             LIMIT ${next_param} OFFSET ${}",
            next_param + 1
        );
        let mut page_query = sqlx::query(&page_sql);
        if let Some(status) = filter.status {
            page_query = page_query.bind(status);
        }
        if let Some(job_type) = &filter.job_type {
            page_query = page_query.bind(job_type);
        }
        let rows = page_query
            .bind(page_size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let jobs = rows
            .iter()
            .map(Self::row_to_job)
            .collect::<Result<Vec<_>>>()?;
        Ok((jobs, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<Job> {
        if !from.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition { from, to });
        }

        let row = sqlx::query(
            r#"
            UPDATE jobs SET
                status        = $3,
                updated_at    = NOW(),
                scheduled_at  = COALESCE($4, scheduled_at),
                started_at    = COALESCE($5, started_at),
                finished_at   = COALESCE($6, finished_at),
                result        = COALESCE($7, result),
                error_message = COALESCE($8, error_message),
                retry_count   = COALESCE($9, retry_count)
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(patch.scheduled_at)
        .bind(patch.started_at)
        .bind(patch.finished_at)
        .bind(patch.result)
        .bind(patch.error_message)
        .bind(patch.retry_count)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_job(&row),
            None => {
                // 区分任务不存在与状态竞争
                let actual: Option<JobStatus> =
                    sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    Some(actual) => Err(SchedulerError::Conflict {
                        id,
                        expected: from,
                        actual,
                    }),
                    None => Err(SchedulerError::JobNotFound { id }),
                }
            }
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = $1 AND status IN ('PENDING', 'SCHEDULED')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("取消任务: id={}", id);
            return Ok(());
        }

        let actual: Option<JobStatus> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match actual {
            Some(status) => Err(SchedulerError::NotCancellable { id, status }),
            None => Err(SchedulerError::JobNotFound { id }),
        }
    }

    async fn claim_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = 'PENDING' ORDER BY created_at ASC, id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn recover(&self) -> Result<RecoveryReport> {
        let scheduled = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', scheduled_at = NULL, updated_at = NOW() \
             WHERE status = 'SCHEDULED'",
        )
        .execute(&self.pool)
        .await?;

        let running = sqlx::query(
            "UPDATE jobs SET status = 'PENDING', started_at = NULL, updated_at = NOW() \
             WHERE status = 'RUNNING'",
        )
        .execute(&self.pool)
        .await?;

        Ok(RecoveryReport {
            scheduled_reset: scheduled.rows_affected(),
            running_reset: running.rows_affected(),
        })
    }

    async fn stats(&self) -> Result<JobStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)                                         AS total,
                COUNT(*) FILTER (WHERE status = 'PENDING')       AS pending,
                COUNT(*) FILTER (WHERE status = 'SCHEDULED')     AS scheduled,
                COUNT(*) FILTER (WHERE status = 'RUNNING')       AS running,
                COUNT(*) FILTER (WHERE status = 'COMPLETED')     AS completed,
                COUNT(*) FILTER (WHERE status = 'FAILED')        AS failed,
                COUNT(*) FILTER (WHERE status = 'RETRIED')       AS retried,
                (AVG(EXTRACT(EPOCH FROM finished_at - started_at))
                    FILTER (WHERE status = 'COMPLETED'
                            AND started_at IS NOT NULL
                            AND finished_at IS NOT NULL)
                )::double precision * 1000.0                     AS avg_execution_ms
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            scheduled: row.try_get("scheduled")?,
            running: row.try_get("running")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            retried: row.try_get("retried")?,
            avg_execution_ms: row.try_get("avg_execution_ms")?,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
