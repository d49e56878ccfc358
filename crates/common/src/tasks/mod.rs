//! Asynchronous post-commit tasks
//!
//! Provides:
//! - The [`Task`] enum and its queue envelope
//! - Serialisation keys (per record, per OAI set, per DOI)
//! - A keyed serial runner with bounded retries
//! - The executor mapping tasks onto the domain services

mod executor;
mod runner;

pub use executor::{register_record_doi, TaskExecutor};
pub use runner::{RetryPolicy, TaskHandler, TaskRunner};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work scheduled after a publication or by the periodic jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Push the record (and its version siblings' flags) to the search index
    IndexRecord { record_id: Uuid },
    /// Register or update the record DOIs with the registrar
    RegisterDoi { recid: String },
    /// Ask curators of provisional communities to review the record
    NotifyCommunities { record_id: Uuid },
    PreservationScore { record_id: Uuid },
    /// Recompute `_oai` for a record
    SyncRecordOai { record_id: Uuid },
    OaiSetAdd { spec: String, record_id: Uuid },
    OaiSetRemove { spec: String, record_id: Uuid },
    VerifyFile { file_id: Uuid },
}

impl Task {
    /// Tasks sharing a key never run concurrently
    pub fn key(&self) -> String {
        match self {
            Task::IndexRecord { record_id }
            | Task::NotifyCommunities { record_id }
            | Task::PreservationScore { record_id }
            | Task::SyncRecordOai { record_id } => format!("record:{}", record_id),
            Task::RegisterDoi { recid } => format!("doi:{}", recid),
            Task::OaiSetAdd { spec, .. } | Task::OaiSetRemove { spec, .. } => format!("oaiset:{}", spec),
            Task::VerifyFile { file_id } => format!("file:{}", file_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::IndexRecord { .. } => "index_record",
            Task::RegisterDoi { .. } => "register_doi",
            Task::NotifyCommunities { .. } => "notify_communities",
            Task::PreservationScore { .. } => "preservation_score",
            Task::SyncRecordOai { .. } => "sync_record_oai",
            Task::OaiSetAdd { .. } => "oai_set_add",
            Task::OaiSetRemove { .. } => "oai_set_remove",
            Task::VerifyFile { .. } => "verify_file",
        }
    }
}

/// Queue message wrapping a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    pub task: Task,
}

impl TaskEnvelope {
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 1,
            task,
        }
    }

    /// Envelope for the next delivery attempt
    pub fn retry(&self) -> Self {
        Self {
            id: self.id,
            attempt: self.attempt + 1,
            task: self.task.clone(),
        }
    }
}
