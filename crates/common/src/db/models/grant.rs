//! Grant knowledge base entries

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "grants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub acronym: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    pub funder: Option<String>,
}

impl Model {
    /// Display title `<acronym> - <title> (<id>)`
    pub fn display_title(&self) -> String {
        match self.acronym.as_deref().filter(|a| !a.is_empty()) {
            Some(acronym) => format!("{} - {} ({})", acronym, self.title, self.id),
            None => format!("{} ({})", self.title, self.id),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
