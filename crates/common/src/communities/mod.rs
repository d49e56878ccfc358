//! Communities and record membership
//!
//! Provides:
//! - Community creation together with its `user-<id>` OAI set
//! - Accept, reject, add and remove of a record (all its versions) in a community
//! - Direct assignment of the communities of one record
//!
//! Every membership change re-synchronises `_oai` of the touched records in
//! the same transaction and schedules their re-indexing.

pub mod mapping;

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::oaiset;
use crate::records;
use crate::services::Services;
use crate::tasks::Task;
use crate::versioning;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, TransactionTrait};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Create a community and the OAI set mirroring it
pub async fn create_community<C: ConnectionTrait>(db: &C, id: &str, title: &str, owner_id: i32) -> Result<Community> {
    if CommunityEntity::find_by_id(id.to_string()).one(db).await?.is_some() {
        return Err(AppError::Conflict {
            message: format!("Community {} already exists", id),
        });
    }

    let now = Utc::now();
    let community = CommunityActiveModel {
        id: Set(id.to_string()),
        title: Set(title.to_string()),
        owner_id: Set(owner_id),
        created: Set(now.into()),
        updated: Set(now.into()),
    }
    .insert(db)
    .await?;

    oaiset::create_set(db, &oaiset::community_spec(id), Some(title), None).await?;
    info!(community = %id, owner_id, "Community created");
    Ok(community)
}

fn list(meta: &Map<String, Value>, key: &str) -> BTreeSet<String> {
    meta.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn store(meta: &mut Map<String, Value>, key: &str, values: BTreeSet<String>) {
    if values.is_empty() {
        meta.remove(key);
    } else {
        meta.insert(key.into(), json!(values));
    }
}

/// Every published version of the record behind `recid`
async fn versions<C: ConnectionTrait>(db: &C, services: &Services, recid: &str) -> Result<Vec<Record>> {
    let pid = services.pids.get_required(db, "recid", recid).await?;
    let Some(concept) = versioning::concept_of(db, &pid).await? else {
        return Ok(vec![records::get_by_recid(db, &services.pids, recid).await?]);
    };

    let mut out = Vec::new();
    for child in versioning::children(db, &concept).await? {
        out.push(records::get_by_recid(db, &services.pids, &child.pid_value).await?);
    }
    Ok(out)
}

/// Apply `change` to each record, commit the changed ones and resync their OAI sets
async fn apply<F>(services: &Services, targets: Vec<Record>, change: F) -> Result<Vec<Record>>
where
    F: Fn(&mut Map<String, Value>) -> bool,
{
    let site = &services.config.site;
    let txn = services.db.write().begin().await?;
    let patterns = oaiset::pattern_sets(&txn).await?;

    let mut changed = Vec::new();
    for record in targets {
        let mut json = record.json.clone();
        let Some(meta) = json.as_object_mut() else {
            continue;
        };
        if !change(meta) {
            continue;
        }
        let record = records::commit(&txn, record, json).await?;
        let (record, _) = oaiset::sync_record(&txn, &services.pids, site, &patterns, record).await?;
        changed.push(record);
    }
    txn.commit().await?;

    for record in &changed {
        if let Err(e) = services.queue.push(Task::IndexRecord { record_id: record.id }).await {
            warn!(record_id = %record.id, error = %e, "Failed to schedule re-index");
        }
    }
    Ok(changed)
}

async fn require_community(services: &Services, community_id: &str) -> Result<Community> {
    services
        .kb
        .community(services.db.read(), community_id)
        .await?
        .ok_or_else(|| AppError::not_found("community", community_id))
}

/// Accept a pending inclusion request for every version of the record
#[instrument(skip(services))]
pub async fn accept_record(services: &Services, community_id: &str, recid: &str) -> Result<Vec<Record>> {
    require_community(services, community_id).await?;
    let targets = versions(services.db.read(), services, recid).await?;
    let requested = targets.iter().any(|r| {
        r.json
            .as_object()
            .is_some_and(|m| list(m, "provisional_communities").contains(community_id))
    });
    if !requested {
        return Err(AppError::NotFound {
            resource_type: "inclusion request".into(),
            id: format!("{}:{}", community_id, recid),
        });
    }

    let changed = apply(services, targets, |meta| {
        let mut provisional = list(meta, "provisional_communities");
        let mut communities = list(meta, "communities");
        let removed = provisional.remove(community_id);
        let added = communities.insert(community_id.to_string());
        store(meta, "provisional_communities", provisional);
        store(meta, "communities", communities);
        removed || added
    })
    .await?;
    info!(versions = changed.len(), "Record accepted into community");
    Ok(changed)
}

/// Drop the inclusion request without adding the record
#[instrument(skip(services))]
pub async fn reject_record(services: &Services, community_id: &str, recid: &str) -> Result<Vec<Record>> {
    let targets = versions(services.db.read(), services, recid).await?;
    apply(services, targets, |meta| {
        let mut provisional = list(meta, "provisional_communities");
        let removed = provisional.remove(community_id);
        store(meta, "provisional_communities", provisional);
        removed
    })
    .await
}

/// Add every version of the record without a request
#[instrument(skip(services))]
pub async fn add_record(services: &Services, community_id: &str, recid: &str) -> Result<Vec<Record>> {
    require_community(services, community_id).await?;
    let targets = versions(services.db.read(), services, recid).await?;
    apply(services, targets, |meta| {
        let mut communities = list(meta, "communities");
        let added = communities.insert(community_id.to_string());
        store(meta, "communities", communities);
        added
    })
    .await
}

/// Remove every version of the record from the community
#[instrument(skip(services))]
pub async fn remove_record(services: &Services, community_id: &str, recid: &str) -> Result<Vec<Record>> {
    let targets = versions(services.db.read(), services, recid).await?;
    apply(services, targets, |meta| {
        let mut communities = list(meta, "communities");
        let removed = communities.remove(community_id);
        store(meta, "communities", communities);
        removed
    })
    .await
}

/// Replace the accepted communities of a single record
#[instrument(skip(services, communities))]
pub async fn set_record_communities(services: &Services, recid: &str, communities: &[String]) -> Result<Record> {
    let db = services.db.read();
    let known = services.kb.known_communities(db, communities, true).await?;
    if let Some(missing) = communities.iter().find(|c| !known.contains(*c)) {
        return Err(AppError::field(
            "communities",
            format!("Provided community does not exist: {}", missing),
        ));
    }

    let record = records::get_by_recid(db, &services.pids, recid).await?;
    let wanted: BTreeSet<String> = communities.iter().cloned().collect();
    let fallback = record.clone();
    let mut changed = apply(services, vec![record], |meta| {
        let mut provisional = list(meta, "provisional_communities");
        provisional.retain(|c| !wanted.contains(c));
        let before = list(meta, "communities");
        store(meta, "provisional_communities", provisional);
        store(meta, "communities", wanted.clone());
        before != wanted
    })
    .await?;
    Ok(changed.pop().unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::{ensure_user, Actor};
    use crate::pidstore::NewPid;
    use crate::records::RECORD_OBJECT_TYPE;
    use uuid::Uuid;

    async fn setup() -> Services {
        let services = Services::in_memory().await.unwrap();
        let db = services.db.write();
        ensure_user(db, &Actor::user(1, "curator@example.org")).await.unwrap();
        for id in ["c1", "c2"] {
            create_community(db, id, id, 1).await.unwrap();
        }
        services
    }

    async fn record(services: &Services, recid: &str, json: Value) -> Record {
        let db = services.db.write();
        let record = records::create(db, Uuid::new_v4(), json).await.unwrap();
        services
            .pids
            .create(
                db,
                NewPid::new("recid", recid)
                    .status(PidStatus::Registered)
                    .object(RECORD_OBJECT_TYPE, record.id),
            )
            .await
            .unwrap();
        record
    }

    fn sets(record: &Record) -> Vec<String> {
        serde_json::from_value(record.json["_oai"]["sets"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_create_community_adds_oai_set() {
        let services = setup().await;
        let db = services.db.read();
        let set = OaiSetEntity::find().all(db).await.unwrap();
        let mut specs: Vec<&str> = set.iter().map(|s| s.spec.as_str()).collect();
        specs.sort();
        assert_eq!(specs, vec!["user-c1", "user-c2"]);

        let err = create_community(db, "c1", "again", 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_community_change_resyncs_oai_sets() {
        let services = setup().await;
        let r = record(
            &services,
            "7",
            json!({
                "recid": 7,
                "communities": ["c1"],
                "_oai": {"id": "oai:zenodo.org:7", "sets": ["user-c1"], "updated": "2020-01-01T00:00:00Z"}
            }),
        )
        .await;

        let updated = set_record_communities(&services, "7", &["c1".into(), "c2".into()]).await.unwrap();
        assert_eq!(updated.id, r.id);
        assert_eq!(sets(&updated), vec!["user-c1", "user-c2"]);
        assert_ne!(updated.json["_oai"]["updated"], "2020-01-01T00:00:00Z");

        let updated = set_record_communities(&services, "7", &["c2".into()]).await.unwrap();
        assert_eq!(sets(&updated), vec!["user-c2"]);

        let err = set_record_communities(&services, "7", &["nope".into()]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidFields { .. }));
    }

    #[tokio::test]
    async fn test_accept_reject_and_remove() {
        let services = setup().await;
        record(
            &services,
            "8",
            json!({"recid": 8, "provisional_communities": ["c1", "c2", "zenodo"]}),
        )
        .await;

        let accepted = accept_record(&services, "c1", "8").await.unwrap();
        assert_eq!(accepted[0].json["communities"], json!(["c1"]));
        assert_eq!(accepted[0].json["provisional_communities"], json!(["c2", "zenodo"]));
        assert_eq!(sets(&accepted[0]), vec!["user-c1"]);

        let err = accept_record(&services, "c1", "8").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let rejected = reject_record(&services, "c2", "8").await.unwrap();
        assert_eq!(rejected[0].json["provisional_communities"], json!(["zenodo"]));

        let removed = remove_record(&services, "c1", "8").await.unwrap();
        assert!(removed[0].json.get("communities").is_none());
        assert!(sets(&removed[0]).is_empty());

        // Nothing left to remove
        assert!(remove_record(&services, "c1", "8").await.unwrap().is_empty());
    }
}
