//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{PipelineId, TaskId};
use super::status::{Status, Timestamps};
use super::task::Task;

/// Full pipeline snapshot
///
/// Tasks are listed in ascending `order`, each with its resolved `depends_on`.
/// This is the payload of `update_pipeline` messages and of the pipeline
/// read endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub description: String,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub tasks: Vec<Task>,
}

impl Pipeline {
    /// Dependency edges `(task, depends_on)` in task order
    pub fn edges(&self) -> Vec<(TaskId, TaskId)> {
        self.tasks
            .iter()
            .flat_map(|task| task.depends_on.iter().map(move |dep| (task.task_id, *dep)))
            .collect()
    }
}

/// Task counts per status for one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTaskStats {
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub total_tasks: usize,
    /// Keyed by lowercase status name; every status is present
    pub task_statuses: BTreeMap<String, usize>,
    pub last_updated: DateTime<Utc>,
}

impl PipelineTaskStats {
    pub fn tally<'a>(
        pipeline_id: PipelineId,
        pipeline_name: String,
        statuses: impl IntoIterator<Item = &'a Status>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut task_statuses: BTreeMap<String, usize> = Status::ALL
            .iter()
            .map(|status| (status.as_str().to_lowercase(), 0))
            .collect();

        let mut total_tasks = 0;
        for status in statuses {
            total_tasks += 1;
            *task_statuses
                .entry(status.as_str().to_lowercase())
                .or_default() += 1;
        }

        Self {
            pipeline_id,
            pipeline_name,
            total_tasks,
            task_statuses,
            last_updated: now,
        }
    }
}

/// Execution figures for one pipeline
///
/// Times are in minutes. A task counts towards the average only when it has
/// both a start and an end time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineAnalytics {
    pub pipeline_id: PipelineId,
    pub pipeline_name: String,
    pub status: Status,
    pub avg_task_execution_time: f64,
    /// Failed tasks
    pub error_count: usize,
    /// Percentage of tasks completed, 0 for an empty pipeline
    pub success_rate: f64,
    pub avg_pipeline_execution_time: f64,
}

impl PipelineAnalytics {
    pub fn compute(
        pipeline_id: PipelineId,
        pipeline_name: String,
        status: Status,
        pipeline_times: Timestamps,
        tasks: impl IntoIterator<Item = (Status, Timestamps)>,
    ) -> Self {
        let mut total = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut timed_minutes = Vec::new();

        for (task_status, times) in tasks {
            total += 1;
            match task_status {
                Status::Completed => completed += 1,
                Status::Failed => failed += 1,
                Status::Pending | Status::Running => {}
            }
            if let Some(minutes) = elapsed_minutes(times) {
                timed_minutes.push(minutes);
            }
        }

        let avg_task_execution_time = if timed_minutes.is_empty() {
            0.0
        } else {
            timed_minutes.iter().sum::<f64>() / timed_minutes.len() as f64
        };

        let success_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        Self {
            pipeline_id,
            pipeline_name,
            status,
            avg_task_execution_time,
            error_count: failed,
            success_rate,
            avg_pipeline_execution_time: elapsed_minutes(pipeline_times).unwrap_or(0.0),
        }
    }
}

fn elapsed_minutes(times: Timestamps) -> Option<f64> {
    match (times.start_time, times.end_time) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 60_000.0),
        _ => None,
    }
}
