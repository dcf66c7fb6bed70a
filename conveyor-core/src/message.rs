//! Delta messages fanned out to observers
//!
//! Every message is a JSON object discriminated by its `action` field.

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::Pipeline;
use crate::domain::task::TaskDelta;
use crate::domain::{PipelineId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Full pipeline snapshot
    UpdatePipeline { pipeline: Pipeline },
    /// Single task snapshot
    UpdateTask {
        task: TaskDelta,
        pipeline_id: PipelineId,
    },
    DeletePipeline { pipeline_id: PipelineId },
    DeleteTask {
        task_id: TaskId,
        pipeline_id: PipelineId,
    },
}

impl SyncMessage {
    pub fn action(&self) -> &'static str {
        match self {
            SyncMessage::UpdatePipeline { .. } => "update_pipeline",
            SyncMessage::UpdateTask { .. } => "update_task",
            SyncMessage::DeletePipeline { .. } => "delete_pipeline",
            SyncMessage::DeleteTask { .. } => "delete_task",
        }
    }

    /// Pipeline this message concerns
    pub fn pipeline_id(&self) -> PipelineId {
        match self {
            SyncMessage::UpdatePipeline { pipeline } => pipeline.pipeline_id,
            SyncMessage::UpdateTask { pipeline_id, .. }
            | SyncMessage::DeletePipeline { pipeline_id }
            | SyncMessage::DeleteTask { pipeline_id, .. } => *pipeline_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::status::Status;
    use crate::domain::task::Task;
    use serde_json::json;

    fn sample_delta() -> TaskDelta {
        TaskDelta {
            task_id: 11,
            name: "test".to_string(),
            description: "unit tests".to_string(),
            status: Status::Failed,
            assignee: String::new(),
            pipeline_name: "ci".to_string(),
            start_time: None,
            end_time: None,
            duration: "0 days, 0 hours, 0 minutes".to_string(),
            error_count: 1,
            warning_count: 0,
            progress_percentage: 40,
            tags: vec![],
        }
    }

    #[test]
    fn test_update_pipeline_shape() {
        let message = SyncMessage::UpdatePipeline {
            pipeline: Pipeline {
                pipeline_id: 2,
                name: "ci".to_string(),
                description: String::new(),
                status: Status::Running,
                start_time: None,
                end_time: None,
                tasks: vec![Task {
                    task_id: 5,
                    name: "build".to_string(),
                    status: Status::Completed,
                    description: String::new(),
                    depends_on: vec![],
                    order: 1,
                    start_time: None,
                    end_time: None,
                    assignee: Some("alice".to_string()),
                    tags: vec!["fast".to_string()],
                }],
            },
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["action"], "update_pipeline");
        assert_eq!(value["pipeline"]["pipeline_id"], 2);
        assert_eq!(value["pipeline"]["status"], "Running");
        assert_eq!(value["pipeline"]["tasks"][0]["status"], "Completed");
        assert_eq!(value["pipeline"]["tasks"][0]["depends_on"], json!([]));
        assert_eq!(value["pipeline"]["tasks"][0]["assignee"], "alice");
        assert_eq!(message.pipeline_id(), 2);
    }

    #[test]
    fn test_update_task_shape() {
        let message = SyncMessage::UpdateTask {
            task: sample_delta(),
            pipeline_id: 2,
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["action"], "update_task");
        assert_eq!(value["pipeline_id"], 2);
        assert_eq!(value["task"]["task_id"], 11);
        assert_eq!(value["task"]["status"], "Failed");
        assert_eq!(value["task"]["assignee"], "");
        assert_eq!(value["task"]["pipeline_name"], "ci");
        assert_eq!(value["task"]["error_count"], 1);
        assert_eq!(value["task"]["progress_percentage"], 40);
    }

    #[test]
    fn test_delete_shapes() {
        let pipeline = serde_json::to_value(SyncMessage::DeletePipeline { pipeline_id: 3 }).unwrap();
        assert_eq!(pipeline, json!({"action": "delete_pipeline", "pipeline_id": 3}));

        let task = serde_json::to_value(SyncMessage::DeleteTask {
            task_id: 8,
            pipeline_id: 3,
        })
        .unwrap();
        assert_eq!(
            task,
            json!({"action": "delete_task", "task_id": 8, "pipeline_id": 3})
        );
    }

    #[test]
    fn test_parses_incoming_action() {
        let parsed: SyncMessage =
            serde_json::from_value(json!({"action": "delete_task", "task_id": 1, "pipeline_id": 2}))
                .unwrap();
        assert_eq!(parsed.action(), "delete_task");
        assert_eq!(
            parsed,
            SyncMessage::DeleteTask {
                task_id: 1,
                pipeline_id: 2
            }
        );
    }
}
