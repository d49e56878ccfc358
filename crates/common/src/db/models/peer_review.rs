//! Peer review notifications received through the COAR inbox

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing status of a peer review
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Received,
    Processing,
    Published,
    Failed,
    Deleted,
}

impl From<String> for ReviewStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "P" => ReviewStatus::Processing,
            "D" => ReviewStatus::Published,
            "F" => ReviewStatus::Failed,
            "E" => ReviewStatus::Deleted,
            _ => ReviewStatus::Received,
        }
    }
}

impl From<ReviewStatus> for String {
    fn from(status: ReviewStatus) -> Self {
        match status {
            ReviewStatus::Received => "R",
            ReviewStatus::Processing => "P",
            ReviewStatus::Published => "D",
            ReviewStatus::Failed => "F",
            ReviewStatus::Deleted => "E",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "peer_reviews")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub notification_id: String,

    #[sea_orm(column_type = "Text")]
    pub doi_url: String,

    #[sea_orm(column_type = "Text")]
    pub origin: String,

    pub status: String,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub errors: Option<Json>,

    pub event_id: Option<Uuid>,

    pub record_id: Option<Uuid>,

    pub created: DateTimeWithTimeZone,

    pub updated: DateTimeWithTimeZone,
}

impl Model {
    pub fn review_status(&self) -> ReviewStatus {
        ReviewStatus::from(self.status.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
