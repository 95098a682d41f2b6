// Background job types: trigger variants, statuses, notification routing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of background job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Runs once at `run_at`, then terminal
    OneOff,
    /// Recurs on a cron expression or a fixed interval
    Scheduled,
    /// Recurs on an interval until a condition or iteration cap is met
    Ongoing,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::OneOff => "one_off",
            JobType::Scheduled => "scheduled",
            JobType::Ongoing => "ongoing",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "one_off" => Ok(JobType::OneOff),
            "scheduled" => Ok(JobType::Scheduled),
            "ongoing" => Ok(JobType::Ongoing),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    /// Transient claim held by exactly one executor
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "active" => Ok(JobStatus::Active),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Tagged trigger configuration. Stored as JSONB on the job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    OneOff {
        run_at: DateTime<Utc>,
    },
    Scheduled {
        #[serde(skip_serializing_if = "Option::is_none")]
        cron: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        interval_seconds: Option<i64>,
    },
    Ongoing {
        interval_seconds: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_condition: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_iterations: Option<i32>,
    },
}

impl TriggerConfig {
    pub fn job_type(&self) -> JobType {
        match self {
            TriggerConfig::OneOff { .. } => JobType::OneOff,
            TriggerConfig::Scheduled { .. } => JobType::Scheduled,
            TriggerConfig::Ongoing { .. } => JobType::Ongoing,
        }
    }

    /// Validate the variant-specific invariants
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TriggerConfig::OneOff { .. } => Ok(()),
            TriggerConfig::Scheduled {
                cron,
                interval_seconds,
            } => match (cron, interval_seconds) {
                (Some(_), None) | (None, Some(_)) => Ok(()),
                (Some(_), Some(_)) => {
                    Err("scheduled trigger takes cron or interval_seconds, not both".into())
                }
                (None, None) => {
                    Err("scheduled trigger requires cron or interval_seconds".into())
                }
            },
            TriggerConfig::Ongoing {
                interval_seconds,
                end_condition,
                max_iterations,
            } => {
                if *interval_seconds <= 0 {
                    return Err("ongoing trigger requires a positive interval_seconds".into());
                }
                if end_condition.is_none() && max_iterations.is_none() {
                    return Err(
                        "ongoing trigger requires end_condition or max_iterations".into()
                    );
                }
                Ok(())
            }
        }
    }
}

/// Where job results are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMethod {
    Inbox,
}

impl NotificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationMethod::Inbox => "inbox",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_config_serializes_tagged() {
        let cfg = TriggerConfig::Ongoing {
            interval_seconds: 86400,
            end_condition: Some("customer places order".into()),
            max_iterations: Some(10),
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["kind"], "ongoing");
        assert_eq!(json["interval_seconds"], 86400);
        let back: TriggerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn scheduled_requires_exactly_one_source() {
        assert!(TriggerConfig::Scheduled {
            cron: Some("0 9 * * *".into()),
            interval_seconds: None,
        }
        .validate()
        .is_ok());
        assert!(TriggerConfig::Scheduled {
            cron: None,
            interval_seconds: None,
        }
        .validate()
        .is_err());
        assert!(TriggerConfig::Scheduled {
            cron: Some("0 9 * * *".into()),
            interval_seconds: Some(60),
        }
        .validate()
        .is_err());
    }

    #[test]
    fn ongoing_requires_a_termination_path() {
        assert!(TriggerConfig::Ongoing {
            interval_seconds: 3600,
            end_condition: None,
            max_iterations: None,
        }
        .validate()
        .is_err());
        assert!(TriggerConfig::Ongoing {
            interval_seconds: 3600,
            end_condition: None,
            max_iterations: Some(3),
        }
        .validate()
        .is_ok());
    }
}
