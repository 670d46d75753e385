use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::discovery::AuthStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Job lifecycle: `pending -> running -> {completed | failed | timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "timeout" => Some(JobStatus::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// Only single forward steps are allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next == JobStatus::Running,
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s)
                    .ok_or_else(|| FromSqlError::Other(format!("unknown {} '{s}'", $what).into()))
            }
        }
    };
}

text_enum_sql!(RunStatus, "run status");
text_enum_sql!(JobStatus, "job status");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub id: String,
    pub created_at: String,
    pub suite_path: Option<String>,
    pub config_snapshot: Option<String>,
    pub status: RunStatus,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    pub prompt_preview: Option<String>,
    pub prompt_stored: bool,
    pub status: JobStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub id: i64,
    pub job_id: String,
    pub name: String,
    pub value: f64,
    pub unit: Option<String>,
    pub is_estimated: bool,
}

/// Input for a new job row; the store assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    /// Already redacted.
    pub prompt_preview: Option<String>,
    pub prompt_stored: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub is_estimated: bool,
}

impl NewMetric {
    pub fn measured(name: &str, value: f64, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            is_estimated: false,
        }
    }

    pub fn estimated(name: &str, value: f64, unit: &str) -> Self {
        Self {
            is_estimated: true,
            ..Self::measured(name, value, unit)
        }
    }
}

/// Terminal state written together with the job's metrics.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    /// Already redacted.
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub provider: String,
    pub binary_path: String,
    pub binary_version: Option<String>,
    pub auth_status: AuthStatus,
    pub models: Vec<String>,
    pub features: serde_json::Value,
    /// Set by the store.
    pub detected_at: Option<String>,
}
