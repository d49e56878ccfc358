//! Concept/version relations between record identifiers
//!
//! A `conceptrecid` PID is the parent of every `recid` published as a
//! version of the same work. Published children carry a 0-based ordinal;
//! the single unpublished draft child has no ordinal.

use crate::db::models::*;
use crate::errors::{AppError, Result};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position of a version among its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    /// Ordinal of the version; a draft gets the ordinal it would publish with
    pub index: i32,
    /// Published versions plus the active draft
    pub count: i32,
    pub is_last: bool,
}

fn relations_of(parent: &Pid) -> sea_orm::Select<PidRelationEntity> {
    PidRelationEntity::find()
        .filter(PidRelationColumn::ParentId.eq(parent.id))
        .filter(PidRelationColumn::RelationType.eq(RELATION_VERSION))
}

/// Draft child of a concept, if any
pub async fn draft_child<C: ConnectionTrait>(db: &C, parent: &Pid) -> Result<Option<Pid>> {
    let relation = relations_of(parent)
        .filter(PidRelationColumn::Index.is_null())
        .one(db)
        .await?;

    match relation {
        Some(r) => PidEntity::find_by_id(r.child_id).one(db).await.map_err(Into::into),
        None => Ok(None),
    }
}

/// Attach a draft child; only one draft may exist per concept
pub async fn insert_draft_child<C: ConnectionTrait>(db: &C, parent: &Pid, child: &Pid) -> Result<()> {
    if let Some(existing) = draft_child(db, parent).await? {
        if existing.id == child.id {
            return Ok(());
        }
        return Err(AppError::Conflict {
            message: format!(
                "Concept {} already has a draft version ({})",
                parent.pid_value, existing.pid_value
            ),
        });
    }

    PidRelationActiveModel {
        parent_id: Set(parent.id),
        child_id: Set(child.id),
        relation_type: Set(RELATION_VERSION),
        index: Set(None),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Detach a draft child (e.g. when the new-version deposition is deleted)
pub async fn remove_draft_child<C: ConnectionTrait>(db: &C, parent: &Pid, child: &Pid) -> Result<()> {
    PidRelationEntity::delete_many()
        .filter(PidRelationColumn::ParentId.eq(parent.id))
        .filter(PidRelationColumn::ChildId.eq(child.id))
        .filter(PidRelationColumn::Index.is_null())
        .exec(db)
        .await?;
    Ok(())
}

/// Publish a child as the newest version.
///
/// The child gets `max(index) + 1`; it may be the current draft child or a
/// child never attached before (first version). Returns the version that
/// was last before this call, which needs re-indexing.
pub async fn publish_child<C: ConnectionTrait>(db: &C, parent: &Pid, child: &Pid) -> Result<Option<Pid>> {
    let existing = relations_of(parent)
        .filter(PidRelationColumn::ChildId.eq(child.id))
        .one(db)
        .await?;

    if let Some(ref relation) = existing {
        if relation.index.is_some() {
            // Already published
            return Ok(None);
        }
    }

    let previous = last_child(db, parent).await?;
    let next_index = relations_of(parent)
        .filter(PidRelationColumn::Index.is_not_null())
        .order_by_desc(PidRelationColumn::Index)
        .one(db)
        .await?
        .and_then(|r| r.index)
        .map(|i| i + 1)
        .unwrap_or(0);

    match existing {
        Some(relation) => {
            let mut active: PidRelationActiveModel = relation.into();
            active.index = Set(Some(next_index));
            active.update(db).await?;
        }
        None => {
            PidRelationActiveModel {
                parent_id: Set(parent.id),
                child_id: Set(child.id),
                relation_type: Set(RELATION_VERSION),
                index: Set(Some(next_index)),
            }
            .insert(db)
            .await?;
        }
    }

    Ok(previous)
}

/// Published children ordered by version
pub async fn children<C: ConnectionTrait>(db: &C, parent: &Pid) -> Result<Vec<Pid>> {
    let relations = relations_of(parent)
        .filter(PidRelationColumn::Index.is_not_null())
        .order_by_asc(PidRelationColumn::Index)
        .all(db)
        .await?;

    let ids: Vec<i32> = relations.iter().map(|r| r.child_id).collect();
    let mut by_id: HashMap<i32, Pid> = PidEntity::find()
        .filter(PidColumn::Id.is_in(ids.clone()))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    Ok(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}

/// Newest published child
pub async fn last_child<C: ConnectionTrait>(db: &C, parent: &Pid) -> Result<Option<Pid>> {
    let relation = relations_of(parent)
        .filter(PidRelationColumn::Index.is_not_null())
        .order_by_desc(PidRelationColumn::Index)
        .one(db)
        .await?;

    match relation {
        Some(r) => PidEntity::find_by_id(r.child_id).one(db).await.map_err(Into::into),
        None => Ok(None),
    }
}

/// Concept of a version
pub async fn concept_of<C: ConnectionTrait>(db: &C, child: &Pid) -> Result<Option<Pid>> {
    let relation = PidRelationEntity::find()
        .filter(PidRelationColumn::ChildId.eq(child.id))
        .filter(PidRelationColumn::RelationType.eq(RELATION_VERSION))
        .one(db)
        .await?;

    match relation {
        Some(r) => PidEntity::find_by_id(r.parent_id).one(db).await.map_err(Into::into),
        None => Ok(None),
    }
}

/// Sibling summary exposed to the search index
pub async fn summary<C: ConnectionTrait>(db: &C, child: &Pid) -> Result<Option<VersionSummary>> {
    let Some(relation) = PidRelationEntity::find()
        .filter(PidRelationColumn::ChildId.eq(child.id))
        .filter(PidRelationColumn::RelationType.eq(RELATION_VERSION))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    let siblings = PidRelationEntity::find()
        .filter(PidRelationColumn::ParentId.eq(relation.parent_id))
        .filter(PidRelationColumn::RelationType.eq(RELATION_VERSION))
        .all(db)
        .await?;

    let published: Vec<i32> = siblings.iter().filter_map(|r| r.index).collect();
    let has_draft = siblings.iter().any(|r| r.index.is_none());
    let max_index = published.iter().copied().max();
    let count = published.len() as i32 + i32::from(has_draft);

    Ok(Some(match relation.index {
        Some(index) => VersionSummary {
            index,
            count,
            is_last: Some(index) == max_index,
        },
        None => VersionSummary {
            index: max_index.map(|i| i + 1).unwrap_or(0),
            count,
            is_last: false,
        },
    }))
}
