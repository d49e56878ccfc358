//! Published record entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Canonical nested metadata
    #[sea_orm(column_type = "JsonBinary")]
    pub json: Json,

    /// Bumped on every committed change
    pub version_id: i32,

    pub created: DateTimeWithTimeZone,

    pub updated: DateTimeWithTimeZone,
}

impl Model {
    /// Record identifier stored in the metadata
    pub fn recid(&self) -> Option<String> {
        match self.json.get("recid") {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Community identifiers of the record
    pub fn communities(&self) -> Vec<String> {
        self.json
            .get("communities")
            .and_then(|c| c.as_array())
            .map(|c| {
                c.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bucket holding the record files
    pub fn record_bucket(&self) -> Option<Uuid> {
        self.json
            .get("_buckets")
            .and_then(|b| b.get("record"))
            .and_then(|b| b.as_str())
            .and_then(|b| Uuid::parse_str(b).ok())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::record_revision::Entity")]
    Revisions,
}

impl Related<super::record_revision::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Revisions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
