//! Task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::TaskId;
use super::status::Status;

/// Task as it appears inside a pipeline snapshot
///
/// `depends_on` is list-typed for compatibility with existing observers even
/// though the chain maintainer only ever produces zero or one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub name: String,
    pub status: Status,
    pub description: String,
    pub depends_on: Vec<TaskId>,
    pub order: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Single-task snapshot used for high-frequency updates
///
/// Payload of `update_task` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDelta {
    pub task_id: TaskId,
    pub name: String,
    pub description: String,
    pub status: Status,
    /// Assignee username, empty when unassigned
    pub assignee: String,
    pub pipeline_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: String,
    pub error_count: i32,
    pub warning_count: i32,
    pub progress_percentage: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Task details as served to clients asking for one task
///
/// Same content as [`TaskDelta`] under the key names existing clients read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub task_id: TaskId,
    pub name: String,
    pub description: String,
    pub status: Status,
    #[serde(rename = "assignedUser")]
    pub assigned_user: String,
    #[serde(rename = "pipelineName")]
    pub pipeline_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: String,
    pub error_count: i32,
    pub warning_count: i32,
    pub progress_percentage: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<TaskDelta> for TaskDetails {
    fn from(delta: TaskDelta) -> Self {
        Self {
            task_id: delta.task_id,
            name: delta.name,
            description: delta.description,
            status: delta.status,
            assigned_user: delta.assignee,
            pipeline_name: delta.pipeline_name,
            start_time: delta.start_time,
            end_time: delta.end_time,
            duration: delta.duration,
            error_count: delta.error_count,
            warning_count: delta.warning_count,
            progress_percentage: delta.progress_percentage,
            tags: delta.tags,
        }
    }
}

/// Elapsed time between two optional instants as "D days, H hours, M minutes"
///
/// Zero when either end is missing or the interval is negative.
pub fn format_duration(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> String {
    let seconds = match (start, end) {
        (Some(start), Some(end)) => (end - start).num_seconds().max(0),
        _ => 0,
    };

    format!(
        "{} days, {} hours, {} minutes",
        seconds / 86_400,
        (seconds % 86_400) / 3_600,
        (seconds % 3_600) / 60
    )
}

/// Direction of a move within the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid move direction '{0}' (expected up or down)")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_snapshot_task_omits_empty_assignee_and_tags() {
        let task = Task {
            task_id: 3,
            name: "lint".to_string(),
            status: Status::Pending,
            description: String::new(),
            depends_on: vec![2],
            order: 2,
            start_time: None,
            end_time: None,
            assignee: None,
            tags: vec![],
        };

        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("assignee").is_none());
        assert!(json.get("tags").is_none());
        assert_eq!(json["depends_on"], serde_json::json!([2]));
        assert_eq!(json["start_time"], serde_json::Value::Null);
        assert_eq!(json["status"], "Pending");
    }

    #[test]
    fn test_details_use_client_key_names() {
        let delta = TaskDelta {
            task_id: 7,
            name: "deploy".to_string(),
            description: String::new(),
            status: Status::Running,
            assignee: "alice".to_string(),
            pipeline_name: "release".to_string(),
            start_time: None,
            end_time: None,
            duration: format_duration(None, None),
            error_count: 0,
            warning_count: 2,
            progress_percentage: 40,
            tags: vec![],
        };

        let delta_json = serde_json::to_value(&delta).unwrap();
        assert_eq!(delta_json["assignee"], "alice");
        assert_eq!(delta_json["pipeline_name"], "release");

        let json = serde_json::to_value(TaskDetails::from(delta)).unwrap();
        assert_eq!(json["assignedUser"], "alice");
        assert_eq!(json["pipelineName"], "release");
        assert!(json.get("assignee").is_none());
        assert!(json.get("pipeline_name").is_none());
        assert_eq!(json["warning_count"], 2);
        assert_eq!(json["tags"], serde_json::json!([]));
    }

    #[test]
    fn test_format_duration() {
        let start = Utc::now();
        let end = start + Duration::days(1) + Duration::hours(2) + Duration::minutes(5);
        assert_eq!(
            format_duration(Some(start), Some(end)),
            "1 days, 2 hours, 5 minutes"
        );
        assert_eq!(format_duration(Some(start), None), "0 days, 0 hours, 0 minutes");
        assert_eq!(
            format_duration(Some(end), Some(start)),
            "0 days, 0 hours, 0 minutes"
        );
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!("up".parse::<Direction>(), Ok(Direction::Up));
        assert_eq!("down".parse::<Direction>(), Ok(Direction::Down));
        assert!("sideways".parse::<Direction>().is_err());
        assert!("Up".parse::<Direction>().is_err());
    }
}
