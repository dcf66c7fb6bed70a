//! In-memory Repository
//!
//! Keeps everything in process memory. A unit of work holds the store's lock
//! for its whole lifetime and edits a private copy that replaces the shared
//! state on commit, so units of work are fully serialized.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_core::domain::status::{Status, Timestamps};
use conveyor_core::domain::user::User;
use conveyor_core::domain::{PipelineId, TaskId, UserId};
use tokio::sync::OwnedMutexGuard;

use super::{
    NewTask, PipelineRecord, RepoResult, Repository, RepositoryError, RepositoryTx, TaskRecord,
};

/// Operation that can be told to fail once, for exercising rollback paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    DeleteTask,
    UpdateTaskOrder,
    ReplaceDependencyEdges,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    last_pipeline_id: PipelineId,
    last_task_id: TaskId,
    last_user_id: UserId,
    users: BTreeMap<UserId, User>,
    pipelines: BTreeMap<PipelineId, PipelineRecord>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    /// `(task, depends_on)`
    edges: BTreeSet<(TaskId, TaskId)>,
}

impl MemoryState {
    /// Copy of the task with its assignee name resolved
    fn resolve(&self, task: &TaskRecord) -> TaskRecord {
        let mut task = task.clone();
        task.assignee = task
            .assignee_id
            .and_then(|id| self.users.get(&id))
            .map(|user| user.username.clone());
        task
    }

    fn task_mut(&mut self, id: TaskId) -> RepoResult<&mut TaskRecord> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Task {}", id)))
    }

    fn sorted_tasks<'a>(&self, tasks: impl Iterator<Item = &'a TaskRecord>) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = tasks.map(|task| self.resolve(task)).collect();
        tasks.sort_by_key(|task| (task.pipeline_id, task.order));
        tasks
    }

    /// Deferred `(pipeline_id, order)` uniqueness check
    fn check_order_unique(&self) -> RepoResult<()> {
        let mut seen = HashSet::new();
        for task in self.tasks.values() {
            if !seen.insert((task.pipeline_id, task.order)) {
                return Err(RepositoryError::Conflict(format!(
                    "duplicate order {} in pipeline {}",
                    task.order, task.pipeline_id
                )));
            }
        }
        Ok(())
    }
}

/// Repository kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<tokio::sync::Mutex<MemoryState>>,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user; there is no HTTP endpoint for this
    pub async fn insert_user(&self, username: &str) -> User {
        let mut state = self.state.lock().await;
        state.last_user_id += 1;
        let user = User {
            user_id: state.last_user_id,
            username: username.to_string(),
        };
        state.users.insert(user.user_id, user.clone());
        user
    }

    /// Makes the next call of `point` fail with a storage error
    pub fn fail_next(&self, point: FailPoint) {
        *self.fail_point.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> RepoResult<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx {
            guard,
            staged,
            fail_point: self.fail_point.clone(),
        })
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

impl MemoryTx {
    fn trip(&self, point: FailPoint) -> RepoResult<()> {
        let mut armed = self.fail_point.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(RepositoryError::storage(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryTx for MemoryTx {
    // =========================================================================
    // Pipelines
    // =========================================================================

    async fn create_pipeline(
        &mut self,
        name: &str,
        description: &str,
    ) -> RepoResult<PipelineRecord> {
        self.staged.last_pipeline_id += 1;
        let pipeline = PipelineRecord {
            id: self.staged.last_pipeline_id,
            name: name.to_string(),
            description: description.to_string(),
            status: Status::Pending,
            start_time: None,
            end_time: None,
        };
        self.staged.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>> {
        Ok(self.staged.pipelines.get(&id).cloned())
    }

    async fn lock_pipeline(&mut self, id: PipelineId) -> RepoResult<Option<PipelineRecord>> {
        // the unit of work already holds the whole store
        self.get_pipeline(id).await
    }

    async fn list_pipelines(&mut self) -> RepoResult<Vec<PipelineRecord>> {
        Ok(self.staged.pipelines.values().cloned().collect())
    }

    async fn update_pipeline_status(
        &mut self,
        id: PipelineId,
        status: Status,
        timestamps: Timestamps,
    ) -> RepoResult<()> {
        let pipeline = self
            .staged
            .pipelines
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Pipeline {}", id)))?;

        pipeline.status = status;
        pipeline.start_time = timestamps.start_time;
        pipeline.end_time = timestamps.end_time;
        Ok(())
    }

    async fn delete_pipeline(&mut self, id: PipelineId) -> RepoResult<bool> {
        if self.staged.pipelines.remove(&id).is_none() {
            return Ok(false);
        }

        let removed: HashSet<TaskId> = self
            .staged
            .tasks
            .values()
            .filter(|task| task.pipeline_id == id)
            .map(|task| task.id)
            .collect();

        self.staged.tasks.retain(|task_id, _| !removed.contains(task_id));
        self.staged
            .edges
            .retain(|(task, dep)| !removed.contains(task) && !removed.contains(dep));
        Ok(true)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    async fn create_task(&mut self, task: NewTask) -> RepoResult<TaskRecord> {
        if !self.staged.pipelines.contains_key(&task.pipeline_id) {
            return Err(RepositoryError::NotFound(format!(
                "Pipeline {}",
                task.pipeline_id
            )));
        }

        self.staged.last_task_id += 1;
        let record = TaskRecord {
            id: self.staged.last_task_id,
            pipeline_id: task.pipeline_id,
            name: task.name,
            description: task.description,
            status: Status::Pending,
            order: task.order,
            progress: 0,
            assignee_id: None,
            assignee: None,
            tags: Vec::new(),
            start_time: None,
            end_time: None,
            last_updated: Utc::now(),
            error_count: 0,
            warning_count: 0,
        };
        self.staged.tasks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&mut self, id: TaskId) -> RepoResult<Option<TaskRecord>> {
        Ok(self
            .staged
            .tasks
            .get(&id)
            .map(|task| self.staged.resolve(task)))
    }

    async fn list_tasks_by_pipeline(
        &mut self,
        pipeline_id: PipelineId,
    ) -> RepoResult<Vec<TaskRecord>> {
        let tasks = self
            .staged
            .tasks
            .values()
            .filter(|task| task.pipeline_id == pipeline_id);
        Ok(self.staged.sorted_tasks(tasks))
    }

    async fn list_tasks_by_status(&mut self, status: Status) -> RepoResult<Vec<TaskRecord>> {
        let tasks = self
            .staged
            .tasks
            .values()
            .filter(|task| task.status == status);
        Ok(self.staged.sorted_tasks(tasks))
    }

    async fn update_task_order(&mut self, id: TaskId, order: i32) -> RepoResult<()> {
        self.trip(FailPoint::UpdateTaskOrder)?;
        self.staged.task_mut(id)?.order = order;
        Ok(())
    }

    async fn update_task_status(
        &mut self,
        id: TaskId,
        status: Status,
        timestamps: Timestamps,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let task = self.staged.task_mut(id)?;
        task.status = status;
        task.start_time = timestamps.start_time;
        task.end_time = timestamps.end_time;
        task.last_updated = now;
        Ok(())
    }

    async fn update_task_progress(
        &mut self,
        id: TaskId,
        progress: i32,
        now: DateTime<Utc>,
    ) -> RepoResult<()> {
        let task = self.staged.task_mut(id)?;
        task.progress = progress;
        task.last_updated = now;
        Ok(())
    }

    async fn assign_task(&mut self, id: TaskId, user_id: Option<UserId>) -> RepoResult<()> {
        if let Some(user_id) = user_id {
            if !self.staged.users.contains_key(&user_id) {
                return Err(RepositoryError::NotFound(format!("User {}", user_id)));
            }
        }

        self.staged.task_mut(id)?.assignee_id = user_id;
        Ok(())
    }

    async fn add_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()> {
        let task = self.staged.task_mut(id)?;
        if !task.tags.iter().any(|existing| existing == tag) {
            task.tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn remove_tag(&mut self, id: TaskId, tag: &str) -> RepoResult<()> {
        self.staged.task_mut(id)?.tags.retain(|existing| existing != tag);
        Ok(())
    }

    async fn bump_metrics(&mut self, id: TaskId, errors: i32, warnings: i32) -> RepoResult<()> {
        let task = self.staged.task_mut(id)?;
        task.error_count += errors;
        task.warning_count += warnings;
        Ok(())
    }

    async fn delete_task(&mut self, id: TaskId) -> RepoResult<bool> {
        self.trip(FailPoint::DeleteTask)?;

        if self.staged.tasks.remove(&id).is_none() {
            return Ok(false);
        }

        self.staged
            .edges
            .retain(|(task, dep)| *task != id && *dep != id);
        Ok(true)
    }

    // =========================================================================
    // Dependency edges
    // =========================================================================

    async fn get_dependencies(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>> {
        Ok(self
            .staged
            .edges
            .iter()
            .filter(|(task, _)| *task == id)
            .map(|(_, dep)| *dep)
            .collect())
    }

    async fn get_dependents(&mut self, id: TaskId) -> RepoResult<Vec<TaskId>> {
        Ok(self
            .staged
            .edges
            .iter()
            .filter(|(_, dep)| *dep == id)
            .map(|(task, _)| *task)
            .collect())
    }

    async fn replace_dependency_edges(
        &mut self,
        id: TaskId,
        depends_on: &[TaskId],
    ) -> RepoResult<()> {
        self.trip(FailPoint::ReplaceDependencyEdges)?;

        for task_id in std::iter::once(&id).chain(depends_on) {
            if !self.staged.tasks.contains_key(task_id) {
                return Err(RepositoryError::NotFound(format!("Task {}", task_id)));
            }
        }

        self.staged.edges.retain(|(task, _)| *task != id);
        self.staged
            .edges
            .extend(depends_on.iter().map(|dep| (id, *dep)));
        Ok(())
    }

    async fn list_edges(&mut self, pipeline_id: PipelineId) -> RepoResult<Vec<(TaskId, TaskId)>> {
        let order_of = |id: &TaskId| {
            self.staged
                .tasks
                .get(id)
                .filter(|task| task.pipeline_id == pipeline_id)
                .map(|task| task.order)
        };

        let mut edges: Vec<(i32, TaskId, TaskId)> = self
            .staged
            .edges
            .iter()
            .filter_map(|(task, dep)| order_of(task).map(|order| (order, *task, *dep)))
            .collect();
        edges.sort();

        Ok(edges.into_iter().map(|(_, task, dep)| (task, dep)).collect())
    }

    // =========================================================================
    // Users
    // =========================================================================

    async fn get_user(&mut self, id: UserId) -> RepoResult<Option<User>> {
        Ok(self.staged.users.get(&id).cloned())
    }

    async fn list_users(&mut self) -> RepoResult<Vec<User>> {
        Ok(self.staged.users.values().cloned().collect())
    }

    async fn commit(self) -> RepoResult<()> {
        self.trip(FailPoint::Commit)?;
        self.staged.check_order_unique()?;

        let MemoryTx {
            mut guard, staged, ..
        } = self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pipeline_with_tasks(repo: &MemoryRepository, count: i32) -> (PipelineId, Vec<TaskId>) {
        let mut tx = repo.begin().await.unwrap();
        let pipeline = tx.create_pipeline("ci", "").await.unwrap();
        let mut ids = Vec::new();
        for order in 1..=count {
            let task = tx
                .create_task(NewTask {
                    pipeline_id: pipeline.id,
                    name: format!("task-{}", order),
                    description: String::new(),
                    order,
                })
                .await
                .unwrap();
            ids.push(task.id);
        }
        tx.commit().await.unwrap();
        (pipeline.id, ids)
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let repo = MemoryRepository::new();
        let (pipeline_id, _) = pipeline_with_tasks(&repo, 2).await;

        {
            let mut tx = repo.begin().await.unwrap();
            tx.delete_pipeline(pipeline_id).await.unwrap();
        }

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.get_pipeline(pipeline_id).await.unwrap().is_some());
        assert_eq!(tx.list_tasks_by_pipeline(pipeline_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_order_conflicts_on_commit() {
        let repo = MemoryRepository::new();
        let (_, ids) = pipeline_with_tasks(&repo, 2).await;

        let mut tx = repo.begin().await.unwrap();
        tx.update_task_order(ids[1], 1).await.unwrap();
        let result = tx.commit().await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_pipeline_cascades() {
        let repo = MemoryRepository::new();
        let (pipeline_id, ids) = pipeline_with_tasks(&repo, 2).await;

        let mut tx = repo.begin().await.unwrap();
        tx.replace_dependency_edges(ids[1], &[ids[0]]).await.unwrap();
        assert!(tx.delete_pipeline(pipeline_id).await.unwrap());
        assert!(tx.get_task(ids[0]).await.unwrap().is_none());
        assert!(tx.get_dependents(ids[0]).await.unwrap().is_empty());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_tags_and_assignee() {
        let repo = MemoryRepository::new();
        let alice = repo.insert_user("alice").await;
        let (_, ids) = pipeline_with_tasks(&repo, 1).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add_tag(ids[0], "urgent").await.unwrap();
        tx.add_tag(ids[0], "urgent").await.unwrap();
        tx.add_tag(ids[0], "backend").await.unwrap();
        tx.remove_tag(ids[0], "backend").await.unwrap();
        tx.assign_task(ids[0], Some(alice.user_id)).await.unwrap();

        let task = tx.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!(task.tags, vec!["urgent".to_string()]);
        assert_eq!(task.assignee.as_deref(), Some("alice"));

        let missing = tx.assign_task(ids[0], Some(99)).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fail_point_trips_once() {
        let repo = MemoryRepository::new();
        let (_, ids) = pipeline_with_tasks(&repo, 1).await;
        repo.fail_next(FailPoint::DeleteTask);

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.delete_task(ids[0]).await.is_err());
        assert!(tx.delete_task(ids[0]).await.unwrap());
    }
}
