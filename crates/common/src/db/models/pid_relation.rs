//! Concept to version relations between persistent identifiers

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Relation type code for concept/version relations
pub const RELATION_VERSION: i16 = 0;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pidrelations_relation")]
pub struct Model {
    /// Concept identifier (conceptrecid)
    #[sea_orm(primary_key, auto_increment = false)]
    pub parent_id: i32,

    /// Version identifier (recid)
    #[sea_orm(primary_key, auto_increment = false)]
    pub child_id: i32,

    pub relation_type: i16,

    /// Ordinal of a published version; `None` marks the draft child
    pub index: Option<i32>,
}

impl Model {
    pub fn is_draft(&self) -> bool {
        self.index.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pid::Entity",
        from = "Column::ParentId",
        to = "super::pid::Column::Id"
    )]
    Parent,

    #[sea_orm(
        belongs_to = "super::pid::Entity",
        from = "Column::ChildId",
        to = "super::pid::Column::Id"
    )]
    Child,
}

impl ActiveModelBehavior for ActiveModel {}
