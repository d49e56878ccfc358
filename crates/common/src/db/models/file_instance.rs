//! Content-addressed file instances

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Blob store location
    #[sea_orm(column_type = "Text")]
    pub uri: String,

    pub size: i64,

    /// `sha256:<hex>`
    #[sea_orm(column_type = "Text", indexed)]
    pub checksum: String,

    /// Outcome of the last integrity check; `None` when inconclusive or never run
    pub last_check: Option<bool>,

    pub last_check_at: Option<DateTimeWithTimeZone>,

    pub created: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::object_version::Entity")]
    Objects,
}

impl Related<super::object_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Objects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
