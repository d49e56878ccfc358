//! Reconciliation of the aggregator community mapping
//!
//! The mapping ties each aggregator (OpenAIRE) community to local
//! communities. An update may rename an entry, set a primary community that
//! was absent, and grow the community list. Anything else is refused.

use crate::db::models::{CommunityEntity, UserColumn, UserEntity};
use crate::errors::{AppError, Result};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub name: String,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub types: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_community: Option<String>,
    /// Only present in incoming mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub curators: Vec<String>,
}

/// Entries keyed by aggregator community, kept in alphabetical order
pub type CommunityMapping = BTreeMap<String, MappingEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unresolved {
    pub openaire_community: String,
    pub zenodo_community: String,
}

/// Primary community to create locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommunity {
    pub id: String,
    pub title: String,
    pub owner: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub mapping: CommunityMapping,
    pub diff: BTreeMap<String, Map<String, Value>>,
    pub unresolved: Vec<Unresolved>,
    pub new_communities: Vec<NewCommunity>,
}

/// Changed fields between two entries, or the list of refused changes
pub fn compare(current: &MappingEntry, new: &MappingEntry) -> std::result::Result<Map<String, Value>, Vec<String>> {
    let mut diff = Map::new();
    let mut violations = Vec::new();

    if current.name != new.name {
        diff.insert("name".into(), json!(new.name));
    }

    match (&current.primary_community, &new.primary_community) {
        (None, Some(primary)) => {
            diff.insert("primary_community".into(), json!(primary));
        }
        (Some(old), Some(primary)) if old != primary => {
            violations.push(format!("primary_community cannot change from {} to {}", old, primary));
        }
        (Some(old), None) => {
            violations.push(format!("primary_community {} cannot be removed", old));
        }
        _ => {}
    }

    let dropped: Vec<&String> = current
        .communities
        .iter()
        .filter(|c| !new.communities.contains(c))
        .collect();
    if !dropped.is_empty() {
        violations.push(format!(
            "communities cannot be removed: {}",
            dropped.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
        ));
    } else if current.communities != new.communities {
        diff.insert("communities".into(), json!(new.communities));
    }

    if violations.is_empty() {
        Ok(diff)
    } else {
        Err(violations)
    }
}

/// Primary communities of `mapping` that do not exist yet, each owned by
/// the first curator with a registered account
pub async fn new_communities<C: ConnectionTrait>(db: &C, mapping: &CommunityMapping) -> Result<Vec<NewCommunity>> {
    let mut out: Vec<NewCommunity> = Vec::new();

    for (key, entry) in mapping {
        let Some(primary) = &entry.primary_community else {
            continue;
        };
        if out.iter().any(|c| &c.id == primary) {
            continue;
        }
        if CommunityEntity::find_by_id(primary.clone()).one(db).await?.is_some() {
            continue;
        }

        let mut owner = None;
        for email in &entry.curators {
            if let Some(user) = UserEntity::find()
                .filter(UserColumn::Email.eq(email.as_str()))
                .one(db)
                .await?
            {
                owner = Some(user.id);
                break;
            }
        }
        match owner {
            Some(owner) => out.push(NewCommunity {
                id: primary.clone(),
                title: entry.name.clone(),
                owner,
            }),
            None => warn!(entry = %key, community = %primary, "No registered curator, community not created"),
        }
    }

    Ok(out)
}

/// Create the communities listed by [`new_communities`]
pub async fn create_communities<C: ConnectionTrait>(db: &C, communities: &[NewCommunity]) -> Result<()> {
    for community in communities {
        super::create_community(db, &community.id, &community.title, community.owner).await?;
    }
    Ok(())
}

/// Merge `new` into `current`.
///
/// Unknown local communities are left out of the updated entries and
/// reported. A refused change fails the whole reconciliation with every
/// violation listed.
pub async fn reconcile<C: ConnectionTrait>(
    db: &C,
    current: &CommunityMapping,
    new: &CommunityMapping,
) -> Result<Reconciliation> {
    let mut result = Reconciliation {
        mapping: current.clone(),
        ..Default::default()
    };
    let mut violations = Vec::new();

    for (key, entry) in new {
        let mut resolved = Vec::new();
        for community in &entry.communities {
            if CommunityEntity::find_by_id(community.clone()).one(db).await?.is_some() {
                resolved.push(community.clone());
            } else {
                result.unresolved.push(Unresolved {
                    openaire_community: key.clone(),
                    zenodo_community: community.clone(),
                });
            }
        }

        let updated = MappingEntry {
            communities: resolved,
            curators: Vec::new(),
            ..entry.clone()
        };

        match current.get(key) {
            Some(existing) => {
                let existing = MappingEntry {
                    curators: Vec::new(),
                    ..existing.clone()
                };
                match compare(&existing, &updated) {
                    Ok(diff) if diff.is_empty() => {}
                    Ok(diff) => {
                        result.diff.insert(key.clone(), diff);
                        result.mapping.insert(key.clone(), updated);
                    }
                    Err(found) => violations.extend(found.into_iter().map(|v| format!("{}: {}", key, v))),
                }
            }
            None => {
                let mut diff = Map::new();
                diff.insert("name".into(), json!(updated.name));
                diff.insert("communities".into(), json!(updated.communities));
                if let Some(primary) = &updated.primary_community {
                    diff.insert("primary_community".into(), json!(primary));
                }
                result.diff.insert(key.clone(), diff);
                result.mapping.insert(key.clone(), updated);
            }
        }
    }

    if !violations.is_empty() {
        return Err(AppError::Conflict {
            message: violations.join("; "),
        });
    }

    for entry in result.mapping.values_mut() {
        entry.curators.clear();
    }
    result.new_communities = new_communities(db, new).await?;
    info!(
        changed = result.diff.len(),
        unresolved = result.unresolved.len(),
        new = result.new_communities.len(),
        "Community mapping reconciled"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communities::create_community;
    use crate::db::DbPool;
    use crate::deposit::{ensure_user, Actor};

    fn entry(name: &str, communities: &[&str], primary: Option<&str>, curators: &[&str]) -> MappingEntry {
        MappingEntry {
            name: name.into(),
            communities: communities.iter().map(|c| c.to_string()).collect(),
            types: Vec::new(),
            primary_community: primary.map(String::from),
            curators: curators.iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn db() -> DbPool {
        let pool = DbPool::in_memory().await.unwrap();
        let db = pool.write();
        ensure_user(db, &Actor::user(1, "first@example.org")).await.unwrap();
        ensure_user(db, &Actor::user(2, "second@example.org")).await.unwrap();
        for id in ["zenodo", "ecfunded", "grants_comm"] {
            create_community(db, id, id, 1).await.unwrap();
        }
        pool
    }

    fn incoming() -> CommunityMapping {
        BTreeMap::from([
            (
                "oa_comm1".to_string(),
                entry("Community num 1", &["zenodo"], Some("zenodo"), &["first@example.org"]),
            ),
            (
                "oa_comm2".to_string(),
                entry(
                    "Community num 2",
                    &["ecfunded", "grants_comm", "wrong_comm"],
                    Some("z_comm2"),
                    &["unknown@example.org", "second@example.org"],
                ),
            ),
        ])
    }

    #[test]
    fn test_compare() {
        let current = entry("Community num 2", &["ecfunded"], None, &[]);
        let new = entry("Community num 2", &["ecfunded", "grants_comm"], Some("z_comm2"), &[]);
        let diff = compare(&current, &new).unwrap();
        assert_eq!(Value::Object(diff), json!({"communities": ["ecfunded", "grants_comm"], "primary_community": "z_comm2"}));

        let changed = entry("Community num 2", &["ecfunded"], Some("other"), &[]);
        let current = entry("Community num 2", &["ecfunded"], Some("z_comm2"), &[]);
        assert_eq!(compare(&current, &changed).unwrap_err().len(), 1);

        let shrunk = entry("Community num 2", &[], Some("z_comm2"), &[]);
        assert_eq!(compare(&current, &shrunk).unwrap_err().len(), 1);
    }

    #[tokio::test]
    async fn test_new_communities() {
        let pool = db().await;
        let found = new_communities(pool.read(), &incoming()).await.unwrap();
        assert_eq!(
            found,
            vec![NewCommunity {
                id: "z_comm2".into(),
                title: "Community num 2".into(),
                owner: 2,
            }]
        );

        create_communities(pool.write(), &found).await.unwrap();
        assert!(new_communities(pool.read(), &incoming()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile() {
        let pool = db().await;
        let current = BTreeMap::from([
            ("oa_comm1".to_string(), entry("Community num 1", &["zenodo"], Some("zenodo"), &[])),
            ("oa_comm2".to_string(), entry("Community num 2", &["ecfunded"], Some("z_comm2"), &[])),
        ]);

        let result = reconcile(pool.read(), &current, &incoming()).await.unwrap();
        assert_eq!(
            result.mapping["oa_comm2"],
            entry("Community num 2", &["ecfunded", "grants_comm"], Some("z_comm2"), &[])
        );
        assert_eq!(result.mapping["oa_comm1"].curators, Vec::<String>::new());
        assert_eq!(result.diff.len(), 1);
        assert_eq!(Value::Object(result.diff["oa_comm2"].clone()), json!({"communities": ["ecfunded", "grants_comm"]}));
        assert_eq!(
            result.unresolved,
            vec![Unresolved {
                openaire_community: "oa_comm2".into(),
                zenodo_community: "wrong_comm".into(),
            }]
        );
        assert_eq!(result.new_communities.len(), 1);
    }

    #[tokio::test]
    async fn test_primary_community_never_changes() {
        let pool = db().await;
        let current = BTreeMap::from([(
            "oa_comm1".to_string(),
            entry("Community num 1", &["zenodo"], Some("zenodo"), &[]),
        )]);
        let new = BTreeMap::from([(
            "oa_comm1".to_string(),
            entry("Community num 1", &["zenodo"], Some("ecfunded"), &[]),
        )]);

        let err = reconcile(pool.read(), &current, &new).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert!(err.to_string().contains("oa_comm1"));
    }
}
