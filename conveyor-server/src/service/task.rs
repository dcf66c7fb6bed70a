//! Task Service
//!
//! Task edits that leave the dependency chain alone: status, assignee,
//! tags and progress, plus the periodic progress sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conveyor_core::domain::status::Status;
use conveyor_core::domain::task::TaskDetails;
use conveyor_core::domain::user::User;
use conveyor_core::domain::{TaskId, UserId};
use tracing::{debug, info};

use super::error::{Result, ServiceError};
use super::notifier::ChangeNotifier;
use crate::repository::{Repository, RepositoryTx, TaskRecord};

/// Tasks touched by one progress sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub started: Vec<TaskId>,
    pub still_running: Vec<TaskId>,
}

impl SweepReport {
    pub fn touched(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.started)
            .chain(&self.still_running)
            .copied()
    }
}

/// Error and warning increments for a status change
///
/// Entering `Failed` counts an error; falling back from `Running` to
/// `Pending` counts a warning.
pub fn metric_increments(from: Status, to: Status) -> (i32, i32) {
    match (from, to) {
        (from, Status::Failed) if from != Status::Failed => (1, 0),
        (Status::Running, Status::Pending) => (0, 1),
        _ => (0, 0),
    }
}

pub struct TaskService<R: Repository> {
    repo: Arc<R>,
    notifier: ChangeNotifier<R>,
    stale_after: Duration,
}

impl<R: Repository> TaskService<R> {
    pub fn new(repo: Arc<R>, notifier: ChangeNotifier<R>, stale_after: Duration) -> Self {
        Self {
            repo,
            notifier,
            stale_after,
        }
    }

    /// Change a task's status, updating metrics and timestamps
    pub async fn update_status(&self, task_id: TaskId, status: &str) -> Result<()> {
        let status = status
            .parse::<Status>()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let now = Utc::now();
        let mut tx = self.repo.begin().await?;
        let task = find_task(&mut tx, task_id).await?;

        apply_status(&mut tx, &task, status, now).await?;
        tx.commit().await?;

        info!("Task {} status: {} -> {}", task_id, task.status, status);

        self.notifier.task_updated(task_id).await;
        self.notifier.pipeline_updated(task.pipeline_id).await;

        Ok(())
    }

    /// Assign a task to a user
    pub async fn assign(&self, task_id: TaskId, user_id: UserId) -> Result<()> {
        let mut tx = self.repo.begin().await?;
        find_task(&mut tx, task_id).await?;

        let user = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))?;

        tx.assign_task(task_id, Some(user_id)).await?;
        tx.commit().await?;

        info!("Task {} assigned to {}", task_id, user.username);

        self.notifier.task_updated(task_id).await;

        Ok(())
    }

    pub async fn add_tag(&self, task_id: TaskId, tag: &str) -> Result<()> {
        let tag = validate_tag(tag)?;

        let mut tx = self.repo.begin().await?;
        find_task(&mut tx, task_id).await?;
        tx.add_tag(task_id, tag).await?;
        tx.commit().await?;

        debug!("Task {} tagged '{}'", task_id, tag);

        self.notifier.task_updated(task_id).await;

        Ok(())
    }

    pub async fn remove_tag(&self, task_id: TaskId, tag: &str) -> Result<()> {
        let tag = validate_tag(tag)?;

        let mut tx = self.repo.begin().await?;
        find_task(&mut tx, task_id).await?;
        tx.remove_tag(task_id, tag).await?;
        tx.commit().await?;

        debug!("Task {} untagged '{}'", task_id, tag);

        self.notifier.task_updated(task_id).await;

        Ok(())
    }

    /// Record reported progress, 0 to 100
    pub async fn set_progress(&self, task_id: TaskId, progress: i32) -> Result<()> {
        if !(0..=100).contains(&progress) {
            return Err(ServiceError::Validation(format!(
                "Progress must be between 0 and 100, got {}",
                progress
            )));
        }

        let mut tx = self.repo.begin().await?;
        find_task(&mut tx, task_id).await?;
        tx.update_task_progress(task_id, progress, Utc::now()).await?;
        tx.commit().await?;

        debug!("Task {} progress: {}%", task_id, progress);

        self.notifier.task_updated(task_id).await;

        Ok(())
    }

    pub async fn details(&self, task_id: TaskId) -> Result<TaskDetails> {
        let (delta, _) = self.notifier.task_delta(task_id).await?;
        Ok(delta.into())
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let mut tx = self.repo.begin().await?;
        Ok(tx.list_users().await?)
    }

    /// One pass of the progress sweep
    ///
    /// Running tasks at 100% complete, running tasks without an update for
    /// longer than the stale threshold fail, and pending tasks with some
    /// progress start. Every touched or still running task is re-broadcast.
    pub async fn sweep_progress(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let mut report = SweepReport::default();
        let mut tx = self.repo.begin().await?;

        for task in tx.list_tasks_by_status(Status::Running).await? {
            if task.progress >= 100 {
                apply_status(&mut tx, &task, Status::Completed, now).await?;
                report.completed.push(task.id);
            } else if now - task.last_updated > stale_after {
                apply_status(&mut tx, &task, Status::Failed, now).await?;
                report.failed.push(task.id);
            } else {
                report.still_running.push(task.id);
            }
        }

        for task in tx.list_tasks_by_status(Status::Pending).await? {
            if task.progress > 0 {
                apply_status(&mut tx, &task, Status::Running, now).await?;
                report.started.push(task.id);
            }
        }

        tx.commit().await?;

        info!(
            "Progress sweep: {} completed, {} failed, {} started, {} running",
            report.completed.len(),
            report.failed.len(),
            report.started.len(),
            report.still_running.len()
        );

        for task_id in report.touched() {
            self.notifier.task_updated(task_id).await;
        }

        Ok(report)
    }
}

async fn find_task<T: RepositoryTx>(tx: &mut T, task_id: TaskId) -> Result<TaskRecord> {
    tx.get_task(task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Task {}", task_id)))
}

async fn apply_status<T: RepositoryTx>(
    tx: &mut T,
    task: &TaskRecord,
    status: Status,
    now: DateTime<Utc>,
) -> Result<()> {
    let (errors, warnings) = metric_increments(task.status, status);
    if errors > 0 || warnings > 0 {
        tx.bump_metrics(task.id, errors, warnings).await?;
    }

    let timestamps = status.stamp(now, task.timestamps());
    tx.update_task_status(task.id, status, timestamps, now).await?;
    Ok(())
}

fn validate_tag(tag: &str) -> Result<&str> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ServiceError::Validation("Tag cannot be empty".to_string()));
    }
    Ok(tag)
}
