use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Status of a docking task as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Paused,
}

impl TaskStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "paused" => Self::Paused,
            other => {
                if other != "pending" {
                    tracing::warn!(status = other, "unknown task status, defaulting to pending");
                }
                Self::Pending
            }
        }
    }
}

/// Status of a single ligand work item within a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkItemStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => {
                if other != "pending" {
                    tracing::warn!(
                        status = other,
                        "unknown work item status, defaulting to pending"
                    );
                }
                Self::Pending
            }
        }
    }
}

/// Shared docking parameters for every ligand in a task: a search box and
/// the executable's run parameters. Carried on the wire verbatim as the
/// `params` object of a `get_task` reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DockingParams {
    pub center_x: f64,
    pub center_y: f64,
    pub center_z: f64,
    pub size_x: f64,
    pub size_y: f64,
    pub size_z: f64,
    pub num_modes: u32,
    pub energy_range: f64,
    pub cpu: u32,
}

/// A docking task: one receptor, a batch of ligands, and shared docking
/// parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub receptor_path: String,
    pub docking_params: DockingParams,
    pub status: TaskStatus,
    pub total_ligands: i64,
    pub created_at: DateTime<Utc>,
}

/// A single ligand's docking work item, the unit the dispatcher leases out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub ligand_id: String,
    pub ligand_file: String,
    pub status: WorkItemStatus,
    pub retry_count: i32,
    pub last_updated: DateTime<Utc>,
    pub output_file: Option<String>,
}

/// One row of compute-node telemetry, appended on every heartbeat frame.
/// Identity is the peer's observable network address, never a value the
/// client asserts — nodes are otherwise anonymous.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub client_addr: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_heartbeat: DateTime<Utc>,
}
