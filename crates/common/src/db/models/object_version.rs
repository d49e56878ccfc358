//! Versioned key pointers inside a bucket

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "object_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub version_id: Uuid,

    #[sea_orm(indexed)]
    pub bucket_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub key: String,

    /// Content pointer; `None` marks a delete marker
    pub file_id: Option<Uuid>,

    /// Display order inside the bucket
    pub position: i32,

    /// Only the head version of a key is visible
    pub is_head: bool,

    pub created: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bucket::Entity",
        from = "Column::BucketId",
        to = "super::bucket::Column::Id"
    )]
    Bucket,

    #[sea_orm(
        belongs_to = "super::file_instance::Entity",
        from = "Column::FileId",
        to = "super::file_instance::Column::Id"
    )]
    File,
}

impl Related<super::bucket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bucket.def()
    }
}

impl Related<super::file_instance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
