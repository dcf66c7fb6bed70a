//! Pipeline Service
//!
//! Business logic for pipeline management.

use std::sync::Arc;

use chrono::Utc;
use conveyor_core::domain::PipelineId;
use conveyor_core::domain::pipeline::{Pipeline, PipelineAnalytics, PipelineTaskStats};
use conveyor_core::domain::status::Status;
use conveyor_core::dto::pipeline::CreatePipeline;
use tracing::info;

use super::chain::PipelineLocks;
use super::error::{Result, ServiceError};
use super::notifier::{ChangeNotifier, load_pipeline};
use crate::repository::{Repository, RepositoryTx};

const MAX_NAME_LEN: usize = 255;

pub struct PipelineService<R: Repository> {
    repo: Arc<R>,
    locks: Arc<PipelineLocks>,
    notifier: ChangeNotifier<R>,
}

impl<R: Repository> PipelineService<R> {
    pub fn new(repo: Arc<R>, locks: Arc<PipelineLocks>, notifier: ChangeNotifier<R>) -> Self {
        Self {
            repo,
            locks,
            notifier,
        }
    }

    /// Create a new pipeline
    pub async fn create(&self, req: CreatePipeline) -> Result<Pipeline> {
        validate_pipeline_request(&req)?;

        let mut tx = self.repo.begin().await?;
        let record = tx.create_pipeline(req.name.trim(), &req.description).await?;
        tx.commit().await?;

        info!("Pipeline created: {} ({})", record.name, record.id);

        self.notifier.pipeline_updated(record.id).await;

        Ok(Pipeline {
            pipeline_id: record.id,
            name: record.name,
            description: record.description,
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            tasks: Vec::new(),
        })
    }

    /// Get a pipeline snapshot by ID
    pub async fn get(&self, id: PipelineId) -> Result<Pipeline> {
        self.notifier.pipeline_snapshot(id).await
    }

    /// List every pipeline snapshot
    pub async fn list(&self) -> Result<Vec<Pipeline>> {
        let mut tx = self.repo.begin().await?;
        let records = tx.list_pipelines().await?;

        let mut pipelines = Vec::with_capacity(records.len());
        for record in records {
            pipelines.push(load_pipeline(&mut tx, record).await?);
        }

        Ok(pipelines)
    }

    /// Change the pipeline status and stamp its timestamps
    pub async fn update_status(&self, id: PipelineId, status: &str) -> Result<()> {
        let status = status
            .parse::<Status>()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let mut tx = self.repo.begin().await?;
        let record = tx
            .lock_pipeline(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", id)))?;

        let timestamps = status.stamp(Utc::now(), record.timestamps());
        tx.update_pipeline_status(id, status, timestamps).await?;
        tx.commit().await?;

        info!("Pipeline {} status: {} -> {}", id, record.status, status);

        self.notifier.pipeline_updated(id).await;

        Ok(())
    }

    /// Delete a pipeline with all its tasks
    pub async fn delete(&self, id: PipelineId) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.repo.begin().await?;

        if !tx.delete_pipeline(id).await? {
            return Err(ServiceError::NotFound(format!("Pipeline {}", id)));
        }
        tx.commit().await?;

        info!("Pipeline deleted: {}", id);

        self.notifier.pipeline_deleted(id);

        Ok(())
    }

    /// Task counts per status
    pub async fn task_stats(&self, id: PipelineId) -> Result<PipelineTaskStats> {
        let mut tx = self.repo.begin().await?;
        let record = tx
            .get_pipeline(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Pipeline {}", id)))?;

        let tasks = tx.list_tasks_by_pipeline(id).await?;

        Ok(PipelineTaskStats::tally(
            id,
            record.name,
            tasks.iter().map(|task| &task.status),
            Utc::now(),
        ))
    }

    /// Execution figures per pipeline, optionally narrowed to one pipeline
    /// or to pipelines in one status
    pub async fn analytics(
        &self,
        pipeline_id: Option<PipelineId>,
        status: Option<&str>,
    ) -> Result<Vec<PipelineAnalytics>> {
        let status = status
            .map(|status| status.parse::<Status>())
            .transpose()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let mut tx = self.repo.begin().await?;
        let records = tx.list_pipelines().await?;

        let mut analytics = Vec::new();
        for record in records {
            if pipeline_id.is_some_and(|id| id != record.id) {
                continue;
            }
            if status.is_some_and(|status| status != record.status) {
                continue;
            }

            let tasks = tx.list_tasks_by_pipeline(record.id).await?;
            let pipeline_times = record.timestamps();
            analytics.push(PipelineAnalytics::compute(
                record.id,
                record.name,
                record.status,
                pipeline_times,
                tasks.iter().map(|task| (task.status, task.timestamps())),
            ));
        }

        Ok(analytics)
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "Pipeline name cannot be empty".to_string(),
        ));
    }

    if req.name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Pipeline name cannot exceed {} characters",
            MAX_NAME_LEN
        )));
    }

    Ok(())
}
