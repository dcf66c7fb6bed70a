//! Repository Module
//!
//! Data access layer for the server.
//! A [`Repository`] hands out [`RepositoryTx`] units of work; every read and
//! write goes through one. Two implementations ship: Postgres and in-memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::status::{Status, Timestamps};
use conveyor_core::domain::task::{Task, TaskDelta, format_duration};
use conveyor_core::domain::user::User;
use conveyor_core::domain::{PipelineId, TaskId, UserId};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

/// Repository error type
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Uniqueness violation or serialization failure
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        let message: String = message.into();
        RepositoryError::Storage(message.into())
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

// =============================================================================
// Records
// =============================================================================

/// Pipeline row without its tasks
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub name: String,
    pub description: String,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl PipelineRecord {
    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Task row joined with its assignee and metrics
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub description: String,
    pub status: Status,
    pub order: i32,
    pub progress: i32,
    pub assignee_id: Option<UserId>,
    /// Username of the assignee
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub error_count: i32,
    pub warning_count: i32,
}

impl TaskRecord {
    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    /// Snapshot entry for a pipeline snapshot
    pub fn into_task(self, depends_on: Vec<TaskId>) -> Task {
        Task {
            task_id: self.id,
            name: self.name,
            status: self.status,
            description: self.description,
            depends_on,
            order: self.order,
            start_time: self.start_time,
            end_time: self.end_time,
            assignee: self.assignee,
            tags: self.tags,
        }
    }

    pub fn to_delta(&self, pipeline_name: &str) -> TaskDelta {
        TaskDelta {
            task_id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status,
            assignee: self.assignee.clone().unwrap_or_default(),
            pipeline_name: pipeline_name.to_string(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration: format_duration(self.start_time, self.end_time),
            error_count: self.error_count,
            warning_count: self.warning_count,
            progress_percentage: self.progress,
            tags: self.tags.clone(),
        }
    }
}

/// Insert request for a task; the caller picks the order
#[derive(Debug, Clone)]
pub struct NewTask {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub description: String,
    pub order: i32,
}

// =============================================================================
// Traits
// =============================================================================

#[async_trait]
pub trait Repository: Send + Sync + 'static {
    type Tx: RepositoryTx + 'static;

    /// Starts a unit of work
    async fn begin(&self) -> RepoResult<Self::Tx>;
}

/// A unit of work
///
/// Writes become visible to other units of work only after [`commit`].
/// Dropping the value without committing rolls everything back.
///
/// [`commit`]: RepositoryTx::commit
#[async_trait]
pub trait RepositoryTx: Send {
    // Pipelines

    async fn create_pipeline(&mut self, name: &str, description: &str)
    -> RepoResult<PipelineRecord>;

    async fn get_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>>;

    /// Reads the pipeline and holds a row lock on it until the unit of work ends
    async fn lock_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>>;

    async fn list_pipelines(&mut self) -> RepoResult<Vec<PipelineRecord>>;

    async fn update_pipeline_status(
        &mut self,
        id: PipelineId,
        status: Status,
        timestamps: Timestamps,
    ) -> RepoResult<()>;

    /// Deletes the pipeline with its tasks, edges and metrics
    async fn delete_pipeline(&mut self, id: PipelineId) -> RepoResult<bool>;

    // Tasks

    /// Inserts a Pending task with zeroed metrics
    async fn create_task(&mut self, task: NewTask) -> RepoResult<TaskRecord>;

    async fn get_task(&mut self, id: TaskId) -> RepoResult<Option<TaskRecord>>;

    /// Tasks of a pipeline in ascending order
    async fn list_tasks_by_pipeline(&mut self, pipeline_id: PipelineId)
    -> RepoResult<Vec<TaskRecord>>;

    async fn list_tasks_by_status(&mut self, status: Status) -> RepoResult<Vec<TaskRecord>>;

    async fn update_task_order(&mut self, id: TaskId, order: i32) -> RepoResult<()>;

    async fn update_task_status(
        &mut self,
        id: TaskId,
        status: Status,
        timestamps: Timestamps,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn update_task_progress(
        &mut self,
        id: TaskId,
        progress: i32,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn assign_task(&mut self, id: TaskId, user_id: Option<UserId>) -> RepoResult<()>;

    /// Adds a tag unless the task already carries it
    async fn add_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()>;

    async fn remove_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()>;

    /// Adds to the task's error and warning counters
    async fn bump_metrics(&mut self, id: TaskId, errors: i32, warnings: i32) -> RepoResult<()>;

    async fn delete_task(&mut self, id: TaskId) -> RepoResult<bool>;

    // Dependency edges

    /// Tasks `id` depends on
    async fn get_dependencies(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>>;

    /// Tasks depending on `id`
    async fn get_dependents(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>>;

    /// Replaces every outgoing edge of `id` with edges to `depends_on`
    async fn replace_dependency_edges(
        &mut self,
        id: TaskId,
        depends_on: &[TaskId],
    ) -> RepoResult<()>;

    /// All `(task, depends_on)` edges of a pipeline
    async fn list_edges(&mut self, pipeline_id: PipelineId) -> RepoResult<Vec<(TaskId, TaskId)>>;

    // Users

    async fn get_user(&mut self, id: UserId) -> RepoResult<Option<User>>;

    async fn list_users(&mut self) -> RepoResult<Vec<User>>;

    async fn commit(self) -> RepoResult<()>;
}
