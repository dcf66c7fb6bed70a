//! Task request DTOs

use serde::{Deserialize, Serialize};

use crate::domain::{PipelineId, TaskId};

/// Request body for `POST /api/task/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Request body for `POST /api/task/move`
///
/// `direction` stays a raw string so an unknown value can be reported as an
/// invalid operation instead of a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveTask {
    #[serde(rename = "pipelineId")]
    pub pipeline_id: PipelineId,
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    pub direction: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_task_uses_camel_case_ids() {
        let body: MoveTask =
            serde_json::from_str(r#"{"pipelineId": 4, "taskId": 9, "direction": "up"}"#).unwrap();
        assert_eq!(body.pipeline_id, 4);
        assert_eq!(body.task_id, 9);
        assert_eq!(body.direction, "up");
    }

    #[test]
    fn test_create_task_description_defaults_to_empty() {
        let body: CreateTask = serde_json::from_str(r#"{"name": "build"}"#).unwrap();
        assert_eq!(body.name, "build");
        assert!(body.description.is_empty());
    }
}
