use serde::{Deserialize, Serialize};

/// lifecycle state of a [`Build`](crate::build::BuildSummary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    InProgress,
    Success,
    Failure,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failure)
    }
}

/// lifecycle state of a [`StepSummary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    InProgress,
    Success,
    Failure,
}

/// result as reported by a slave for a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResult {
    Success,
    Failure,
}

impl From<StepResult> for StepStatus {
    fn from(result: StepResult) -> Self {
        match result {
            StepResult::Success => StepStatus::Success,
            StepResult::Failure => StepStatus::Failure,
        }
    }
}

/// a build, as surfaced over the admin API; timestamps are unix seconds,
/// 0 when unset, matching the row stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub id: i64,
    pub config: String,
    pub rev: String,
    pub rev_time: i64,
    pub platform: String,

    pub slave: Option<String>,
    pub slave_info: std::collections::BTreeMap<String, String>,

    pub status: BuildStatus,

    pub started: i64,
    pub stopped: i64,
    pub last_activity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub started: i64,
    pub stopped: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub generator: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportItem {
    pub fields: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub category: String,
    pub items: Vec<ReportItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_status_terminal() {
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Failure.is_terminal());
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::InProgress.is_terminal());
    }

    #[test]
    fn step_result_maps_to_status() {
        assert_eq!(StepStatus::from(StepResult::Success), StepStatus::Success);
        assert_eq!(StepStatus::from(StepResult::Failure), StepStatus::Failure);
    }

    #[test]
    fn build_status_serializes_lowercase() {
        let json = serde_json::to_string(&BuildStatus::InProgress).unwrap();
        assert_eq!(json, "\"inprogress\"");
    }
}
