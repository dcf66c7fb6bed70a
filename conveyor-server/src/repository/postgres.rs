//! Postgres Repository
//!
//! Every unit of work is one database transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::status::{Status, Timestamps};
use conveyor_core::domain::user::User;
use conveyor_core::domain::{PipelineId, TaskId, UserId};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    NewTask, PipelineRecord, RepoResult, Repository, RepositoryError, RepositoryTx, TaskRecord,
};

const PIPELINE_SELECT: &str = r#"
    SELECT pipeline_id, name, description, status, start_time, end_time
    FROM pipeline
"#;

const TASK_SELECT: &str = r#"
    SELECT t.task_id, t.pipeline_id, t.name, t.description, t.status, t."order",
           t.progress_percentage, t.assigned_to, u.username AS assignee, t.tags,
           t.start_time, t.end_time, t.last_updated,
           COALESCE(m.error_count, 0) AS error_count,
           COALESCE(m.warning_count, 0) AS warning_count
    FROM task t
    LEFT JOIN "user" u ON u.user_id = t.assigned_to
    LEFT JOIN task_metrics m ON m.task_id = t.task_id
"#;

/// Repository backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    type Tx = PgTx;

    async fn begin(&self) -> RepoResult<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_tasks(&mut self, filter: &str, bind: TaskFilter) -> RepoResult<Vec<TaskRecord>> {
        let sql = format!("{} {} ORDER BY t.pipeline_id, t.\"order\"", TASK_SELECT, filter);
        let query = sqlx::query_as::<_, TaskRow>(&sql);
        let query = match bind {
            TaskFilter::Id(id) => query.bind(id),
            TaskFilter::Status(status) => query.bind(status),
        };

        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(TaskRecord::try_from).collect()
    }
}

enum TaskFilter {
    Id(i64),
    Status(&'static str),
}

fn expect_one_row(rows_affected: u64, what: impl FnOnce() -> String) -> RepoResult<()> {
    if rows_affected == 0 {
        return Err(RepositoryError::NotFound(what()));
    }
    Ok(())
}

#[async_trait]
impl RepositoryTx for PgTx {
    // =========================================================================
    // Pipelines
    // =========================================================================

    async fn create_pipeline(
        &mut self,
        name: &str,
        description: &str,
    ) -> RepoResult<PipelineRecord> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            INSERT INTO pipeline (name, description, status)
            VALUES ($1, $2, $3)
            RETURNING pipeline_id, name, description, status, start_time, end_time
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(Status::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }

    async fn get_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>> {
        let sql = format!("{} WHERE pipeline_id = $1", PIPELINE_SELECT);
        let row = sqlx::query_as::<_, PipelineRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(PipelineRecord::try_from).transpose()
    }

    async fn lock_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>> {
        let sql = format!("{} WHERE pipeline_id = $1 FOR UPDATE", PIPELINE_SELECT);
        let row = sqlx::query_as::<_, PipelineRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(PipelineRecord::try_from).transpose()
    }

    async fn list_pipelines(&mut self) -> RepoResult<Vec<PipelineRecord>> {
        let sql = format!("{} ORDER BY pipeline_id", PIPELINE_SELECT);
        let rows = sqlx::query_as::<_, PipelineRow>(&sql)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(PipelineRecord::try_from).collect()
    }

    async fn update_pipeline_status(
        &mut self,
        id: PipelineId,
        status: Status,
        timestamps: Timestamps,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline
            SET status = $2, start_time = $3, end_time = $4
            WHERE pipeline_id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(timestamps.start_time)
        .bind(timestamps.end_time)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), || format!("Pipeline {}", id))
    }

    async fn delete_pipeline(&mut self, id: PipelineId) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM pipeline WHERE pipeline_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    async fn create_task(&mut self, task: NewTask) -> RepoResult<TaskRecord> {
        let (task_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO task (pipeline_id, name, description, status, "order", last_updated)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING task_id
            "#,
        )
        .bind(task.pipeline_id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(Status::Pending.as_str())
        .bind(task.order)
        .fetch_one(&mut *self.tx)
        .await?;

        sqlx::query(
            "INSERT INTO task_metrics (task_id, error_count, warning_count) VALUES ($1, 0, 0)",
        )
        .bind(task_id)
        .execute(&mut *self.tx)
        .await?;

        self.get_task(task_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Task {}", task_id)))
    }

    async fn get_task(&mut self, id: TaskId) -> RepoResult<Option<TaskRecord>> {
        let mut tasks = self.fetch_tasks("WHERE t.task_id = $1", TaskFilter::Id(id)).await?;
        Ok(tasks.pop())
    }

    async fn list_tasks_by_pipeline(
        &mut self,
        pipeline_id: PipelineId,
    ) -> RepoResult<Vec<TaskRecord>> {
        self.fetch_tasks("WHERE t.pipeline_id = $1", TaskFilter::Id(pipeline_id))
            .await
    }

    async fn list_tasks_by_status(&mut self, status: Status) -> RepoResult<Vec<TaskRecord>> {
        self.fetch_tasks("WHERE t.status = $1", TaskFilter::Status(status.as_str()))
            .await
    }

    async fn update_task_order(&mut self, id: TaskId, order: i32) -> RepoResult<()> {
        let result = sqlx::query(r#"UPDATE task SET "order" = $2 WHERE task_id = $1"#)
            .bind(id)
            .bind(order)
            .execute(&mut *self.tx)
            .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn update_task_status(
        &mut self,
        id: TaskId,
        status: Status,
        timestamps: Timestamps,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task
            SET status = $2, start_time = $3, end_time = $4, last_updated = $5
            WHERE task_id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(timestamps.start_time)
        .bind(timestamps.end_time)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn update_task_progress(
        &mut self,
        id: TaskId,
        progress: i32,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE task SET progress_percentage = $2, last_updated = $3 WHERE task_id = $1",
        )
        .bind(id)
        .bind(progress)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn assign_task(&mut self, id: TaskId, user_id: Option<UserId>) -> RepoResult<()> {
        let result = sqlx::query("UPDATE task SET assigned_to = $2 WHERE task_id = $1")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn add_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task
            SET tags = CASE WHEN $2 = ANY(tags) THEN tags ELSE array_append(tags, $2) END
            WHERE task_id = $1
            "#,
        )
        .bind(id)
        .bind(tag)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn remove_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()> {
        let result = sqlx::query("UPDATE task SET tags = array_remove(tags, $2) WHERE task_id = $1")
            .bind(id)
            .bind(tag)
            .execute(&mut *self.tx)
            .await?;

        expect_one_row(result.rows_affected(), || format!("Task {}", id))
    }

    async fn bump_metrics(&mut self, id: TaskId, errors: i32, warnings: i32) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_metrics (task_id, error_count, warning_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (task_id) DO UPDATE
            SET error_count = task_metrics.error_count + EXCLUDED.error_count,
                warning_count = task_metrics.warning_count + EXCLUDED.warning_count
            "#,
        )
        .bind(id)
        .bind(errors)
        .bind(warnings)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_task(&mut self, id: TaskId) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM task WHERE task_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Dependency edges
    // =========================================================================

    async fn get_dependencies(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT depends_on_task_id FROM task_dependency
            WHERE task_id = $1
            ORDER BY depends_on_task_id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn get_dependents(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT task_id FROM task_dependency
            WHERE depends_on_task_id = $1
            ORDER BY task_id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn replace_dependency_edges(
        &mut self,
        id: TaskId,
        depends_on: &[TaskId],
    ) -> RepoResult<()> {
        sqlx::query("DELETE FROM task_dependency WHERE task_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if depends_on.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO task_dependency (task_id, depends_on_task_id)
            SELECT $1, dep FROM UNNEST($2::BIGINT[]) AS dep
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(depends_on.to_vec())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_edges(&mut self, pipeline_id: PipelineId) -> RepoResult<Vec<(TaskId, TaskId)>> {
        let edges: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT d.task_id, d.depends_on_task_id
            FROM task_dependency d
            JOIN task t ON t.task_id = d.task_id
            WHERE t.pipeline_id = $1
            ORDER BY t."order", d.depends_on_task_id
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(edges)
    }

    // =========================================================================
    // Users
    // =========================================================================

    async fn get_user(&mut self, id: UserId) -> RepoResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"SELECT user_id, username FROM "user" WHERE user_id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_users(&mut self) -> RepoResult<Vec<User>> {
        let rows =
            sqlx::query_as::<_, UserRow>(r#"SELECT user_id, username FROM "user" ORDER BY user_id"#)
                .fetch_all(&mut *self.tx)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn commit(self) -> RepoResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // unique_violation, serialization_failure, deadlock_detected
            if let Some(code) = db_err.code() {
                if matches!(code.as_ref(), "23505" | "40001" | "40P01") {
                    return RepositoryError::Conflict(db_err.message().to_string());
                }
            }
        }

        RepositoryError::Storage(Box::new(err))
    }
}

fn parse_status(raw: &str) -> RepoResult<Status> {
    raw.parse::<Status>()
        .map_err(|e| RepositoryError::Storage(Box::new(e)))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    pipeline_id: i64,
    name: String,
    description: String,
    status: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl TryFrom<PipelineRow> for PipelineRecord {
    type Error = RepositoryError;

    fn try_from(row: PipelineRow) -> RepoResult<Self> {
        Ok(PipelineRecord {
            id: row.pipeline_id,
            name: row.name,
            description: row.description,
            status: parse_status(&row.status)?,
            start_time: row.start_time,
            end_time: row.end_time,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: i64,
    pipeline_id: i64,
    name: String,
    description: String,
    status: String,
    order: i32,
    progress_percentage: i32,
    assigned_to: Option<i64>,
    assignee: Option<String>,
    tags: Vec<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    error_count: i32,
    warning_count: i32,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = RepositoryError;

    fn try_from(row: TaskRow) -> RepoResult<Self> {
        Ok(TaskRecord {
            id: row.task_id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            description: row.description,
            status: parse_status(&row.status)?,
            order: row.order,
            progress: row.progress_percentage,
            assignee_id: row.assigned_to,
            assignee: row.assignee,
            tags: row.tags,
            start_time: row.start_time,
            end_time: row.end_time,
            last_updated: row.last_updated,
            error_count: row.error_count,
            warning_count: row.warning_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: i64,
    username: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            user_id: row.user_id,
            username: row.username,
        }
    }
}
