//! Execution status shared by pipelines and tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a pipeline or task
///
/// The variant names are the exact spellings observers expect on the wire
/// and the values persisted in the `status` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Running,
        Status::Completed,
        Status::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Running => "Running",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
        }
    }

    /// Timestamps after switching to this status.
    ///
    /// `Running` keeps an existing start time (or starts now) and clears the
    /// end time. `Completed` and `Failed` keep the start time and end now.
    /// `Pending` keeps the start time and clears the end time.
    pub fn stamp(self, now: DateTime<Utc>, current: Timestamps) -> Timestamps {
        match self {
            Status::Running => Timestamps {
                start_time: current.start_time.or(Some(now)),
                end_time: None,
            },
            Status::Completed | Status::Failed => Timestamps {
                start_time: current.start_time,
                end_time: Some(now),
            },
            Status::Pending => Timestamps {
                start_time: current.start_time,
                end_time: None,
            },
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not one of the four known values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}' (expected Pending, Running, Completed or Failed)")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Status::Pending),
            "Running" => Ok(Status::Running),
            "Completed" => Ok(Status::Completed),
            "Failed" => Ok(Status::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Start/end pair carried by pipelines and tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_round_trips_exact_spelling() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
    }

    #[test]
    fn test_rejects_other_spellings() {
        assert!("pending".parse::<Status>().is_err());
        assert!("Done".parse::<Status>().is_err());
        assert!("".parse::<Status>().is_err());
    }

    #[test]
    fn test_running_keeps_existing_start() {
        let current = Timestamps {
            start_time: Some(at(1)),
            end_time: Some(at(2)),
        };
        let stamped = Status::Running.stamp(at(3), current);
        assert_eq!(stamped.start_time, Some(at(1)));
        assert_eq!(stamped.end_time, None);
    }

    #[test]
    fn test_running_starts_now_when_never_started() {
        let stamped = Status::Running.stamp(at(3), Timestamps::default());
        assert_eq!(stamped.start_time, Some(at(3)));
    }

    #[test]
    fn test_terminal_statuses_end_now() {
        let current = Timestamps {
            start_time: Some(at(1)),
            end_time: None,
        };
        for status in [Status::Completed, Status::Failed] {
            let stamped = status.stamp(at(4), current);
            assert_eq!(stamped.start_time, Some(at(1)));
            assert_eq!(stamped.end_time, Some(at(4)));
        }
    }

    #[test]
    fn test_pending_clears_end_only() {
        let current = Timestamps {
            start_time: Some(at(1)),
            end_time: Some(at(2)),
        };
        let stamped = Status::Pending.stamp(at(5), current);
        assert_eq!(stamped.start_time, Some(at(1)));
        assert_eq!(stamped.end_time, None);
    }
}
