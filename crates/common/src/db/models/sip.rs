//! Sealed submission information packages

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sips")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub deposit_id: Uuid,

    /// Post-processed metadata, frozen once sealed
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,

    /// Files with restriction rule and ordering comment
    #[sea_orm(column_type = "JsonBinary")]
    pub files: Json,

    /// Submitting agent (e-mail, ip address)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub agent: Option<Json>,

    pub sealed: bool,

    pub created: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::deposit::Entity",
        from = "Column::DepositId",
        to = "super::deposit::Column::Id"
    )]
    Deposit,
}

impl Related<super::deposit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deposit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
