//! Dependency Chain Maintenance
//!
//! Keeps the tasks of a pipeline in a single linear chain: every task except
//! the first depends on exactly the task right before it in `order`.
//! Append, move and delete are serialized per pipeline, in process through
//! [`PipelineLocks`] and across processes through a row lock on the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use conveyor_core::domain::task::{Direction, Task};
use conveyor_core::domain::{PipelineId, TaskId};
use conveyor_core::dto::task::CreateTask;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::error::{Result, ServiceError};
use super::notifier::ChangeNotifier;
use crate::repository::{NewTask, Repository, RepositoryTx};

const MAX_NAME_LEN: usize = 255;

// =============================================================================
// Per-pipeline locks
// =============================================================================

/// One async mutex per pipeline, created on demand
#[derive(Debug, Default)]
pub struct PipelineLocks {
    locks: Mutex<HashMap<PipelineId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PipelineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, pipeline_id: PipelineId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // entries nobody holds or waits for
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(pipeline_id).or_default().clone()
        };

        lock.lock_owned().await
    }
}

// =============================================================================
// Chain arithmetic
// =============================================================================

/// Dependencies of each task when `ids` are chained in the given order
pub fn chain_dependencies(ids: &[TaskId]) -> Vec<(TaskId, Vec<TaskId>)> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let deps = if i == 0 { Vec::new() } else { vec![ids[i - 1]] };
            (*id, deps)
        })
        .collect()
}

/// Dependencies of a task once `removed` is deleted and its own
/// dependencies are inherited
pub fn splice(current: &[TaskId], removed: TaskId, inherited: &[TaskId]) -> Vec<TaskId> {
    let mut deps: Vec<TaskId> = current.iter().copied().filter(|id| *id != removed).collect();
    for id in inherited {
        if *id != removed && !deps.contains(id) {
            deps.push(*id);
        }
    }
    deps
}

// =============================================================================
// Maintainer
// =============================================================================

pub struct ChainMaintainer<R: Repository> {
    repo: Arc<R>,
    locks: Arc<PipelineLocks>,
    notifier: ChangeNotifier<R>,
}

impl<R: Repository> ChainMaintainer<R> {
    pub fn new(repo: Arc<R>, locks: Arc<PipelineLocks>, notifier: ChangeNotifier<R>) -> Self {
        Self {
            repo,
            locks,
            notifier,
        }
    }

    /// Appends a task at the end of the pipeline's chain
    pub async fn append_task(&self, pipeline_id: PipelineId, req: CreateTask) -> Result<Task> {
        validate_task_request(&req)?;

        let _guard = self.locks.acquire(pipeline_id).await;
        let mut tx = self.repo.begin().await?;

        tx.lock_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline_id)))?;

        let tail = tx.list_tasks_by_pipeline(pipeline_id).await?.pop();
        let order = tail.as_ref().map_or(1, |task| task.order + 1);

        let record = tx
            .create_task(NewTask {
                pipeline_id,
                name: req.name,
                description: req.description,
                order,
            })
            .await?;

        let depends_on: Vec<TaskId> = tail.iter().map(|task| task.id).collect();
        if !depends_on.is_empty() {
            tx.replace_dependency_edges(record.id, &depends_on).await?;
        }

        tx.commit().await?;

        info!(
            "Task appended: {} ({}) at order {} in pipeline {}",
            record.name, record.id, order, pipeline_id
        );

        self.notifier.pipeline_updated(pipeline_id).await;

        Ok(record.into_task(depends_on))
    }

    /// Swaps a task with its neighbour and rebuilds the chain
    pub async fn move_task(
        &self,
        pipeline_id: PipelineId,
        task_id: TaskId,
        direction: &str,
    ) -> Result<()> {
        let direction = direction
            .parse::<Direction>()
            .map_err(|e| ServiceError::InvalidOperation(e.to_string()))?;

        let _guard = self.locks.acquire(pipeline_id).await;
        let mut tx = self.repo.begin().await?;

        tx.lock_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline_id)))?;

        let mut tasks = tx.list_tasks_by_pipeline(pipeline_id).await?;
        let index = tasks.iter().position(|task| task.id == task_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Task {} in pipeline {}", task_id, pipeline_id))
        })?;

        let neighbour = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|i| *i < tasks.len()),
        }
        .ok_or_else(|| {
            ServiceError::InvalidOperation("cannot move past chain boundary".to_string())
        })?;

        let (task_order, neighbour_order) = (tasks[index].order, tasks[neighbour].order);
        tx.update_task_order(tasks[index].id, neighbour_order).await?;
        tx.update_task_order(tasks[neighbour].id, task_order).await?;
        tasks[index].order = neighbour_order;
        tasks[neighbour].order = task_order;
        tasks.swap(index, neighbour);

        let ids: Vec<TaskId> = tasks.iter().map(|task| task.id).collect();
        for (id, deps) in chain_dependencies(&ids) {
            tx.replace_dependency_edges(id, &deps).await?;
        }

        tx.commit().await?;

        info!(
            "Task {} moved {} in pipeline {} (order {} -> {})",
            task_id, direction, pipeline_id, task_order, neighbour_order
        );

        self.notifier.pipeline_updated(pipeline_id).await;

        Ok(())
    }

    /// Deletes a task and splices its dependents onto its dependencies
    pub async fn delete_task(&self, task_id: TaskId) -> Result<()> {
        let pipeline_id = {
            let mut tx = self.repo.begin().await?;
            tx.get_task(task_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Task {}", task_id)))?
                .pipeline_id
        };

        let _guard = self.locks.acquire(pipeline_id).await;
        let mut tx = self.repo.begin().await?;

        tx.lock_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline_id)))?;

        // re-check under the lock, a concurrent delete may have won
        match tx.get_task(task_id).await? {
            Some(task) if task.pipeline_id == pipeline_id => {}
            _ => return Err(ServiceError::NotFound(format!("Task {}", task_id))),
        }

        let inherited = tx.get_dependencies(task_id).await?;
        let dependents = tx.get_dependents(task_id).await?;

        for dependent in &dependents {
            let current = tx.get_dependencies(*dependent).await?;
            let deps = splice(&current, task_id, &inherited);
            tx.replace_dependency_edges(*dependent, &deps).await?;
        }

        tx.replace_dependency_edges(task_id, &[]).await?;

        if !tx.delete_task(task_id).await? {
            return Err(ServiceError::NotFound(format!("Task {}", task_id)));
        }

        tx.commit().await?;

        info!(
            "Task deleted: {} from pipeline {} ({} dependent(s) rewired)",
            task_id,
            pipeline_id,
            dependents.len()
        );
        debug!("Task {} dependencies inherited: {:?}", task_id, inherited);

        self.notifier.pipeline_updated(pipeline_id).await;
        self.notifier.task_deleted(task_id, pipeline_id);

        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_task_request(req: &CreateTask) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "Task name cannot be empty".to_string(),
        ));
    }

    if req.name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Task name cannot exceed {} characters",
            MAX_NAME_LEN
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_dependencies() {
        assert!(chain_dependencies(&[]).is_empty());
        assert_eq!(chain_dependencies(&[4]), vec![(4, vec![])]);
        assert_eq!(
            chain_dependencies(&[4, 2, 9]),
            vec![(4, vec![]), (2, vec![4]), (9, vec![2])]
        );
    }

    #[test]
    fn test_splice_inherits_dependencies() {
        // A <- B <- C, deleting B leaves C depending on A
        assert_eq!(splice(&[2], 2, &[1]), vec![1]);
        // deleting the head leaves the dependent with no dependencies
        assert_eq!(splice(&[1], 1, &[]), Vec::<TaskId>::new());
        // no duplicate when the dependency is already present
        assert_eq!(splice(&[2, 1], 2, &[1]), vec![1]);
    }

    #[test]
    fn test_validate_task_request() {
        let ok = CreateTask {
            name: "build".to_string(),
            description: String::new(),
        };
        assert!(validate_task_request(&ok).is_ok());

        let blank = CreateTask {
            name: "   ".to_string(),
            description: String::new(),
        };
        assert!(matches!(
            validate_task_request(&blank),
            Err(ServiceError::Validation(_))
        ));

        let long = CreateTask {
            name: "x".repeat(MAX_NAME_LEN + 1),
            description: String::new(),
        };
        assert!(validate_task_request(&long).is_err());
    }

    #[tokio::test]
    async fn test_locks_are_reclaimed() {
        let locks = PipelineLocks::new();
        {
            let _a = locks.acquire(1).await;
        }
        let _b = locks.acquire(2).await;
        let held = locks.locks.lock().unwrap();
        assert!(!held.contains_key(&1));
        assert!(held.contains_key(&2));
    }
}
