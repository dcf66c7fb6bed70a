//! Change Notifier
//!
//! Re-reads state after a committed mutation and publishes the matching
//! delta message to the hub. Nothing here ever fails the mutation that
//! triggered it: errors are logged and the message is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::domain::task::TaskDelta;
use conveyor_core::domain::{PipelineId, TaskId};
use conveyor_core::message::SyncMessage;
use tracing::{debug, warn};

use super::error::{Result, ServiceError};
use crate::hub::Hub;
use crate::repository::{PipelineRecord, RepoResult, Repository, RepositoryTx, TaskRecord};

pub struct ChangeNotifier<R: Repository> {
    repo: Arc<R>,
    hub: Hub,
}

impl<R: Repository> Clone for ChangeNotifier<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<R: Repository> ChangeNotifier<R> {
    pub fn new(repo: Arc<R>, hub: Hub) -> Self {
        Self { repo, hub }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Full snapshot of one pipeline as observers see it
    pub async fn pipeline_snapshot(&self, pipeline_id: PipelineId) -> Result<Pipeline> {
        let mut tx = self.repo.begin().await?;
        let record = tx
            .get_pipeline(pipeline_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", pipeline_id)))?;

        Ok(load_pipeline(&mut tx, record).await?)
    }

    /// Current delta of one task together with its pipeline id
    pub async fn task_delta(&self, task_id: TaskId) -> Result<(TaskDelta, PipelineId)> {
        let mut tx = self.repo.begin().await?;
        let task = tx
            .get_task(task_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Task {}", task_id)))?;

        let pipeline_name = tx
            .get_pipeline(task.pipeline_id)
            .await?
            .map(|pipeline| pipeline.name)
            .unwrap_or_default();

        Ok((task.to_delta(&pipeline_name), task.pipeline_id))
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub async fn pipeline_updated(&self, pipeline_id: PipelineId) {
        match self.pipeline_snapshot(pipeline_id).await {
            Ok(pipeline) => self.send(SyncMessage::UpdatePipeline { pipeline }),
            Err(e) => warn!(pipeline_id, "Skipping update_pipeline notification: {}", e),
        }
    }

    pub async fn task_updated(&self, task_id: TaskId) {
        match self.task_delta(task_id).await {
            Ok((task, pipeline_id)) => self.send(SyncMessage::UpdateTask { task, pipeline_id }),
            Err(e) => warn!(task_id, "Skipping update_task notification: {}", e),
        }
    }

    pub fn task_deleted(&self, task_id: TaskId, pipeline_id: PipelineId) {
        self.send(SyncMessage::DeleteTask {
            task_id,
            pipeline_id,
        });
    }

    pub fn pipeline_deleted(&self, pipeline_id: PipelineId) {
        self.send(SyncMessage::DeletePipeline { pipeline_id });
    }

    fn send(&self, message: SyncMessage) {
        let action = message.action();
        match self.hub.publish(message) {
            Ok(()) => debug!("Published {}", action),
            Err(e) => warn!("Failed to publish {}: {}", action, e),
        }
    }
}

/// Loads the tasks and edges of a pipeline and assembles its snapshot
pub(crate) async fn load_pipeline<T: RepositoryTx>(
    tx: &mut T,
    record: PipelineRecord,
) -> RepoResult<Pipeline> {
    let tasks = tx.list_tasks_by_pipeline(record.id).await?;
    let edges = tx.list_edges(record.id).await?;
    Ok(assemble_pipeline(record, tasks, &edges))
}

/// Builds a snapshot from a pipeline row, its tasks in order and its edges
pub fn assemble_pipeline(
    record: PipelineRecord,
    tasks: Vec<TaskRecord>,
    edges: &[(TaskId, TaskId)],
) -> Pipeline {
    let mut depends_on: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for (task, dep) in edges {
        depends_on.entry(*task).or_default().push(*dep);
    }

    let tasks = tasks
        .into_iter()
        .map(|task| {
            let deps = depends_on.remove(&task.id).unwrap_or_default();
            task.into_task(deps)
        })
        .collect();

    Pipeline {
        pipeline_id: record.id,
        name: record.name,
        description: record.description,
        status: record.status,
        start_time: record.start_time,
        end_time: record.end_time,
        tasks,
    }
}
