//! Deposition entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Deposition lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Draft,
    InProgress,
    Published,
    Edited,
}

impl From<String> for DepositStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "inprogress" => DepositStatus::InProgress,
            "published" => DepositStatus::Published,
            "edited" => DepositStatus::Edited,
            _ => DepositStatus::Draft,
        }
    }
}

impl From<DepositStatus> for String {
    fn from(status: DepositStatus) -> Self {
        status.as_str().to_string()
    }
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Draft => "draft",
            DepositStatus::InProgress => "inprogress",
            DepositStatus::Published => "published",
            DepositStatus::Edited => "edited",
        }
    }
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deposits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Public deposition number, minted from the recid sequence
    #[sea_orm(unique)]
    pub depid: i32,

    pub owner_id: i32,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// The single active draft, in the legacy flat form shape
    #[sea_orm(column_type = "JsonBinary")]
    pub draft: Json,

    pub bucket_id: Uuid,

    /// Record identifier once the deposition has been published
    pub recid: Option<i32>,

    /// Concept identifier shared with the other versions
    pub conceptrecid: Option<i32>,

    /// Per-field errors of the last failed publication
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub errors: Option<Json>,

    pub created: DateTimeWithTimeZone,

    pub updated: DateTimeWithTimeZone,
}

impl Model {
    /// Get the deposition status as an enum
    pub fn deposit_status(&self) -> DepositStatus {
        DepositStatus::from(self.status.clone())
    }

    /// Pre-reserved DOI stored in the draft, if any
    pub fn prereserved_doi(&self) -> Option<&str> {
        self.draft
            .get("prereserve_doi")
            .and_then(|p| p.get("doi"))
            .and_then(|d| d.as_str())
    }

    /// Pre-reserved recid stored in the draft, if any
    pub fn prereserved_recid(&self) -> Option<i32> {
        self.draft
            .get("prereserve_doi")
            .and_then(|p| p.get("recid"))
            .and_then(|r| r.as_i64())
            .and_then(|r| i32::try_from(r).ok())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sip::Entity")]
    Sips,

    #[sea_orm(
        belongs_to = "super::bucket::Entity",
        from = "Column::BucketId",
        to = "super::bucket::Column::Id"
    )]
    Bucket,
}

impl Related<super::sip::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sips.def()
    }
}

impl Related<super::bucket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bucket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
