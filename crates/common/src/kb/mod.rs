//! Knowledge base lookups (licenses, grants, communities)
//!
//! Lookups go through bounded process-local caches. Publication passes
//! `fresh = true` so a stale entry can never let an unknown reference
//! through.

use crate::cache::LocalCache;
use crate::config::LocalCacheConfig;
use crate::db::models::{
    Community, CommunityColumn, CommunityEntity, Grant, GrantColumn, GrantEntity, License, LicenseEntity,
};
use crate::errors::Result;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Cached views over the reference tables
#[derive(Clone)]
pub struct KnowledgeBase {
    licenses: Arc<LocalCache<String, Option<License>>>,
    grants: Arc<LocalCache<String, Option<Grant>>>,
    communities: Arc<LocalCache<String, Option<Community>>>,
}

impl KnowledgeBase {
    pub fn new(config: &LocalCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.kb_ttl_secs);
        Self {
            licenses: Arc::new(LocalCache::new(ttl, config.kb_capacity)),
            grants: Arc::new(LocalCache::new(ttl, config.kb_capacity)),
            communities: Arc::new(LocalCache::new(ttl, config.kb_capacity)),
        }
    }

    pub async fn license<C: ConnectionTrait>(&self, db: &C, id: &str) -> Result<Option<License>> {
        if let Some(hit) = self.licenses.get(&id.to_string()) {
            return Ok(hit);
        }
        let license = LicenseEntity::find_by_id(id.to_string()).one(db).await?;
        self.licenses.insert(id.to_string(), license.clone());
        Ok(license)
    }

    pub async fn grant<C: ConnectionTrait>(&self, db: &C, id: &str) -> Result<Option<Grant>> {
        if let Some(hit) = self.grants.get(&id.to_string()) {
            return Ok(hit);
        }
        let grant = GrantEntity::find_by_id(id.to_string()).one(db).await?;
        self.grants.insert(id.to_string(), grant.clone());
        Ok(grant)
    }

    pub async fn community<C: ConnectionTrait>(&self, db: &C, id: &str) -> Result<Option<Community>> {
        if let Some(hit) = self.communities.get(&id.to_string()) {
            return Ok(hit);
        }
        let community = CommunityEntity::find_by_id(id.to_string()).one(db).await?;
        self.communities.insert(id.to_string(), community.clone());
        Ok(community)
    }

    /// Subset of `ids` naming existing communities
    pub async fn known_communities<C: ConnectionTrait>(
        &self,
        db: &C,
        ids: &[String],
        fresh: bool,
    ) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        if !fresh {
            let mut known = HashSet::new();
            for id in ids {
                if self.community(db, id).await?.is_some() {
                    known.insert(id.clone());
                }
            }
            return Ok(known);
        }

        let rows = CommunityEntity::find()
            .filter(CommunityColumn::Id.is_in(ids.iter().cloned()))
            .all(db)
            .await?;
        for row in &rows {
            self.communities.insert(row.id.clone(), Some(row.clone()));
        }
        Ok(rows.into_iter().map(|c| c.id).collect())
    }

    /// Subset of `ids` naming existing grants
    pub async fn known_grants<C: ConnectionTrait>(&self, db: &C, ids: &[String], fresh: bool) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        if !fresh {
            let mut known = HashSet::new();
            for id in ids {
                if self.grant(db, id).await?.is_some() {
                    known.insert(id.clone());
                }
            }
            return Ok(known);
        }

        let rows = GrantEntity::find()
            .filter(GrantColumn::Id.is_in(ids.iter().cloned()))
            .all(db)
            .await?;
        for row in &rows {
            self.grants.insert(row.id.clone(), Some(row.clone()));
        }
        Ok(rows.into_iter().map(|g| g.id).collect())
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.licenses.clear();
        self.grants.clear();
        self.communities.clear();
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(&LocalCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CommunityActiveModel, GrantActiveModel, LicenseActiveModel, UserActiveModel};
    use crate::db::DbPool;
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Set};

    #[tokio::test]
    async fn test_lookups_and_fresh_resolution() {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        let kb = KnowledgeBase::default();

        LicenseActiveModel {
            id: Set("cc-by".into()),
            title: Set("Creative Commons Attribution".into()),
            url: Set(Some("https://creativecommons.org/licenses/by/4.0/".into())),
            is_open: Set(true),
        }
        .insert(db)
        .await
        .unwrap();
        GrantActiveModel {
            id: Set("g1".into()),
            acronym: Set(Some("ACR".into())),
            title: Set("Title".into()),
            funder: Set(None),
        }
        .insert(db)
        .await
        .unwrap();

        assert!(kb.license(db, "cc-by").await.unwrap().is_some());
        assert!(kb.license(db, "nope").await.unwrap().is_none());
        assert_eq!(
            kb.known_grants(db, &["g1".into(), "g2".into()], false).await.unwrap(),
            ["g1".to_string()].into_iter().collect()
        );

        // Cached miss is corrected by a fresh lookup
        assert!(kb
            .known_communities(db, &["c1".into()], false)
            .await
            .unwrap()
            .is_empty());
        UserActiveModel {
            id: Set(1),
            email: Set("owner@example.org".into()),
            username: Set(None),
        }
        .insert(db)
        .await
        .unwrap();
        let now = Utc::now();
        CommunityActiveModel {
            id: Set("c1".into()),
            title: Set("Community".into()),
            owner_id: Set(1),
            created: Set(now.into()),
            updated: Set(now.into()),
        }
        .insert(db)
        .await
        .unwrap();

        assert!(kb
            .known_communities(db, &["c1".into()], false)
            .await
            .unwrap()
            .is_empty());
        assert!(kb
            .known_communities(db, &["c1".into()], true)
            .await
            .unwrap()
            .contains("c1"));
    }
}
