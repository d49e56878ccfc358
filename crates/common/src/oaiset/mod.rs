//! OAI set membership of records
//!
//! Provides:
//! - Desired set computation from communities, pattern sets and explicit adds
//! - Per-record synchronisation of `_oai` (id, sets, datestamp) with OAI PID minting
//! - Pattern-set deltas turned into add/remove tasks
//! - The OAI-PMH protocol surface ([`pmh`])

pub mod pmh;
mod query;

pub use query::Query;

use crate::config::SiteConfig;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::pidstore::{NewPid, PidStore};
use crate::records::{self, RECORD_OBJECT_TYPE};
use crate::tasks::Task;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, QueryOrder, Set};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Datestamp granularity of `_oai.updated`
pub const OAI_DATESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Spec prefix of community-bound sets
pub const COMMUNITY_SET_PREFIX: &str = "user-";

pub const OAI_PID_TYPE: &str = "oai";

const SCAN_PAGE: u64 = 500;

pub fn community_spec(community_id: &str) -> String {
    format!("{}{}", COMMUNITY_SET_PREFIX, community_id)
}

pub fn datestamp(at: DateTime<Utc>) -> String {
    at.format(OAI_DATESTAMP_FORMAT).to_string()
}

/// A set defined by a search pattern
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub spec: String,
    pub query: Query,
}

/// Parsed pattern sets; unparsable patterns are logged and skipped
pub async fn pattern_sets<C: ConnectionTrait>(db: &C) -> Result<Vec<PatternSet>> {
    let sets = OaiSetEntity::find()
        .order_by_asc(OaiSetColumn::Spec)
        .all(db)
        .await?;

    Ok(sets
        .into_iter()
        .filter_map(|set| {
            let pattern = set.search_pattern.as_deref()?.trim();
            if pattern.is_empty() {
                return None;
            }
            match Query::parse(pattern) {
                Ok(query) => Some(PatternSet { spec: set.spec, query }),
                Err(e) => {
                    warn!(spec = %set.spec, error = %e, "Skipping OAI set with invalid pattern");
                    None
                }
            }
        })
        .collect())
}

/// Create an OAI set; `search_pattern` is validated before insertion
pub async fn create_set<C: ConnectionTrait>(
    db: &C,
    spec: &str,
    name: Option<&str>,
    search_pattern: Option<&str>,
) -> Result<OaiSet> {
    if let Some(pattern) = search_pattern {
        Query::parse(pattern)?;
    }
    OaiSetActiveModel {
        spec: Set(spec.to_string()),
        name: Set(name.map(String::from)),
        description: Set(None),
        search_pattern: Set(search_pattern.map(String::from)),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

fn stored_sets(record: &Value) -> BTreeSet<String> {
    record
        .pointer("/_oai/sets")
        .and_then(Value::as_array)
        .map(|sets| sets.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

/// Sets a record belongs to: its communities, the pattern sets it matches
/// and any explicitly added set that is neither community nor pattern bound
pub fn desired_sets(record: &Value, patterns: &[PatternSet]) -> BTreeSet<String> {
    let mut sets: BTreeSet<String> = record
        .get("communities")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(community_spec).collect())
        .unwrap_or_default();

    for pattern in patterns {
        if pattern.query.matches(record) {
            sets.insert(pattern.spec.clone());
        }
    }

    for spec in stored_sets(record) {
        let pattern_bound = patterns.iter().any(|p| p.spec == spec);
        if !spec.starts_with(COMMUNITY_SET_PREFIX) && !pattern_bound {
            sets.insert(spec);
        }
    }

    sets
}

/// Rewrite `_oai` when the id, the datestamp or the set list is off.
/// Returns whether the record changed.
pub fn apply_desired_sets(record: &mut Value, oai_id: &str, desired: &BTreeSet<String>, now: DateTime<Utc>) -> bool {
    let current = stored_sets(record);
    let has_id = record.pointer("/_oai/id").and_then(Value::as_str).is_some();
    let has_updated = record.pointer("/_oai/updated").and_then(Value::as_str).is_some();

    if has_id && has_updated && current == *desired {
        return false;
    }

    let Some(obj) = record.as_object_mut() else {
        return false;
    };
    let oai = obj
        .entry("_oai")
        .or_insert_with(|| Value::Object(Map::new()));
    if !oai.is_object() {
        *oai = Value::Object(Map::new());
    }
    if let Some(oai) = oai.as_object_mut() {
        oai.entry("id").or_insert_with(|| Value::String(oai_id.to_string()));
        oai.insert("sets".into(), json!(desired.iter().collect::<Vec<_>>()));
        oai.insert("updated".into(), Value::String(datestamp(now)));
    }
    true
}

/// Mint the OAI PID of a record when it does not exist yet
pub async fn ensure_oai_pid<C: ConnectionTrait>(db: &C, pids: &PidStore, oai_id: &str, record_id: Uuid) -> Result<Pid> {
    if let Some(pid) = pids.get(db, OAI_PID_TYPE, oai_id).await? {
        return Ok(pid);
    }
    pids.create(
        db,
        NewPid::new(OAI_PID_TYPE, oai_id)
            .status(PidStatus::Registered)
            .object(RECORD_OBJECT_TYPE, record_id),
    )
    .await
}

/// Bring `_oai` of a record in line with its desired sets.
///
/// Returns the (possibly committed) record and whether anything changed.
#[instrument(skip(db, pids, site, patterns, record), fields(record_id = %record.id))]
pub async fn sync_record<C: ConnectionTrait>(
    db: &C,
    pids: &PidStore,
    site: &SiteConfig,
    patterns: &[PatternSet],
    record: Record,
) -> Result<(Record, bool)> {
    let recid = record.recid().ok_or_else(|| AppError::Integrity {
        message: format!("Record {} has no recid", record.id),
    })?;
    let oai_id = record
        .json
        .pointer("/_oai/id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| site.oai_identifier(&recid));

    let mut json = record.json.clone();
    let desired = desired_sets(&json, patterns);
    let changed = apply_desired_sets(&mut json, &oai_id, &desired, Utc::now());
    metrics::record_oai_sync(changed);

    if !changed {
        debug!("OAI sets already in sync");
        return Ok((record, false));
    }

    ensure_oai_pid(db, pids, &oai_id, record.id).await?;
    let record = records::commit(db, record, json).await?;
    info!(sets = ?desired, "OAI sets updated");
    Ok((record, true))
}

/// Add a record to (or remove it from) a set explicitly
#[instrument(skip(db))]
pub async fn set_membership<C: ConnectionTrait>(db: &C, record_id: Uuid, spec: &str, member: bool) -> Result<bool> {
    let record = records::get(db, record_id).await?;
    let mut sets = stored_sets(&record.json);

    let changed = if member {
        sets.insert(spec.to_string())
    } else {
        sets.remove(spec)
    };
    if !changed {
        return Ok(false);
    }

    let mut json = record.json.clone();
    if let Some(obj) = json.as_object_mut() {
        let oai = obj.entry("_oai").or_insert_with(|| Value::Object(Map::new()));
        if let Some(oai) = oai.as_object_mut() {
            oai.insert("sets".into(), json!(sets.iter().collect::<Vec<_>>()));
            oai.insert("updated".into(), Value::String(datestamp(Utc::now())));
        }
    }
    records::commit(db, record, json).await?;
    Ok(true)
}

/// Records to add to and remove from a pattern set
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatternDelta {
    pub add: Vec<Uuid>,
    pub remove: Vec<Uuid>,
}

impl PatternDelta {
    pub fn into_tasks(self, spec: &str) -> Vec<Task> {
        let adds = self.add.into_iter().map(|record_id| Task::OaiSetAdd {
            spec: spec.to_string(),
            record_id,
        });
        let removes = self.remove.into_iter().map(|record_id| Task::OaiSetRemove {
            spec: spec.to_string(),
            record_id,
        });
        adds.chain(removes).collect()
    }
}

/// Symmetric difference between matching records and current members
pub async fn pattern_delta<C: ConnectionTrait>(db: &C, set: &PatternSet) -> Result<PatternDelta> {
    let mut delta = PatternDelta::default();
    let mut offset = 0;

    loop {
        let page = records::ids(db, offset, SCAN_PAGE).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as u64;

        for id in page {
            let record = records::get(db, id).await?;
            let matches = set.query.matches(&record.json);
            let member = stored_sets(&record.json).contains(&set.spec);
            match (matches, member) {
                (true, false) => delta.add.push(id),
                (false, true) => delta.remove.push(id),
                _ => {}
            }
        }
    }

    Ok(delta)
}

/// Membership tasks for every pattern set
pub async fn pattern_sync_tasks<C: ConnectionTrait>(db: &C) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for set in pattern_sets(db).await? {
        let delta = pattern_delta(db, &set).await?;
        if !delta.add.is_empty() || !delta.remove.is_empty() {
            info!(
                spec = %set.spec,
                add = delta.add.len(),
                remove = delta.remove.len(),
                "Pattern set out of sync"
            );
        }
        tasks.extend(delta.into_tasks(&set.spec));
    }
    Ok(tasks)
}
