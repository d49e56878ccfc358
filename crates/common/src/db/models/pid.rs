//! Persistent identifier entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a persistent identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PidStatus {
    New,
    Reserved,
    Registered,
    Deleted,
}

impl PidStatus {
    /// One-letter storage code
    pub fn as_code(&self) -> &'static str {
        match self {
            PidStatus::New => "N",
            PidStatus::Reserved => "K",
            PidStatus::Registered => "R",
            PidStatus::Deleted => "D",
        }
    }
}

impl From<String> for PidStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "K" => PidStatus::Reserved,
            "R" => PidStatus::Registered,
            "D" => PidStatus::Deleted,
            _ => PidStatus::New,
        }
    }
}

impl From<PidStatus> for String {
    fn from(status: PidStatus) -> Self {
        status.as_code().to_string()
    }
}

impl std::fmt::Display for PidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PidStatus::New => "NEW",
            PidStatus::Reserved => "RESERVED",
            PidStatus::Registered => "REGISTERED",
            PidStatus::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pidstore_pid")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Identifier scheme (doi, recid, conceptrecid, oai, depid, ...)
    pub pid_type: String,

    pub pid_value: String,

    /// Registrar adapter that manages this identifier
    #[sea_orm(nullable)]
    pub pid_provider: Option<String>,

    /// One-letter status code, see [`PidStatus`]
    #[sea_orm(indexed)]
    pub status: String,

    #[sea_orm(nullable)]
    pub object_type: Option<String>,

    pub object_uuid: Option<Uuid>,

    pub created: DateTimeWithTimeZone,

    pub updated: DateTimeWithTimeZone,
}

impl Model {
    /// Get the status as an enum
    pub fn pid_status(&self) -> PidStatus {
        PidStatus::from(self.status.clone())
    }

    pub fn is_new(&self) -> bool {
        self.pid_status() == PidStatus::New
    }

    pub fn is_reserved(&self) -> bool {
        self.pid_status() == PidStatus::Reserved
    }

    pub fn is_registered(&self) -> bool {
        self.pid_status() == PidStatus::Registered
    }

    pub fn is_deleted(&self) -> bool {
        self.pid_status() == PidStatus::Deleted
    }

    /// Whether an object is assigned to this identifier
    pub fn has_object(&self) -> bool {
        self.object_type.is_some() && self.object_uuid.is_some()
    }

    /// `type:value` label used in log messages
    pub fn label(&self) -> String {
        format!("{}:{}", self.pid_type, self.pid_value)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pid_log::Entity")]
    Logs,
}

impl Related<super::pid_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Logs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
