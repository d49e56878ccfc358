//! Append-only audit log of PID actions

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pidstore_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Nulled when a NEW identifier is hard-deleted
    pub id_pid: Option<i32>,

    pub timestamp: DateTimeWithTimeZone,

    pub action: String,

    #[sea_orm(column_type = "Text")]
    pub message: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pid::Entity",
        from = "Column::IdPid",
        to = "super::pid::Column::Id"
    )]
    Pid,
}

impl Related<super::pid::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pid.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
