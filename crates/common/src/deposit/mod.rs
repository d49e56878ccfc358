//! Depositions
//!
//! Provides:
//! - Creation with prefilled defaults and the per-user autosave cache
//! - Metadata saves validated against the field schema
//! - File operations on the deposition bucket
//! - DOI pre-reservation
//! - Edit, discard, halt, new version and delete transitions
//!
//! Publication itself lives in [`crate::pipeline`].

mod envelope;
pub mod firerole;
pub mod state;

pub use envelope::{envelope, file_entry};
pub use state::Event;

use crate::cache::keys;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::pidstore::NewPid;
use crate::pipeline::postprocess::strip_for_draft;
use crate::records;
use crate::services::Services;
use crate::storage::ObjectInfo;
use crate::translator::nested_to_legacy;
use crate::validators::{self, Mode, ValidationContext};
use crate::versioning;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Object type stored on depid PIDs
pub const DEPOSIT_OBJECT_TYPE: &str = "dep";

/// Authenticated caller of a deposit operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i32,
    pub email: String,
    pub username: Option<String>,
    pub is_admin: bool,
    pub ip_address: Option<String>,
}

impl Actor {
    pub fn user(user_id: i32, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            username: None,
            is_admin: false,
            ip_address: None,
        }
    }

    pub fn admin(user_id: i32, email: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(user_id, email)
        }
    }
}

/// Draft values every new deposition starts with
pub fn default_draft(services: &Services) -> Value {
    let site = &services.config.site;
    json!({
        "access_right": site.default_access_right,
        "license": site.default_license,
        "publication_date": Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    })
}

/// Overlay `top` onto `base`, key by key
pub fn merge(base: Value, top: &Value) -> Value {
    let mut out = match base {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(top) = top.as_object() {
        for (k, v) in top {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

/// Make sure the user row referenced by depositions and communities exists
pub async fn ensure_user<C: ConnectionTrait>(db: &C, actor: &Actor) -> Result<User> {
    if let Some(user) = UserEntity::find_by_id(actor.user_id).one(db).await? {
        return Ok(user);
    }
    UserActiveModel {
        id: Set(actor.user_id),
        email: Set(actor.email.clone()),
        username: Set(actor.username.clone()),
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Deposition operations over the shared services
#[derive(Clone)]
pub struct DepositService {
    services: Services,
}

impl DepositService {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub async fn get(&self, depid: i32) -> Result<Deposit> {
        find_deposit(self.services.db.read(), depid).await
    }

    /// Load a deposition the actor may act on
    pub async fn get_for(&self, actor: &Actor, depid: i32) -> Result<Deposit> {
        let deposit = self.get(depid).await?;
        authorize(&deposit, actor)?;
        Ok(deposit)
    }

    /// Deposition owning a bucket, for the direct bucket endpoints
    pub async fn get_by_bucket(&self, actor: &Actor, bucket_id: Uuid) -> Result<Deposit> {
        let deposit = DepositEntity::find()
            .filter(DepositColumn::BucketId.eq(bucket_id))
            .one(self.services.db.read())
            .await?
            .ok_or_else(|| AppError::not_found("bucket", bucket_id))?;
        authorize(&deposit, actor)?;
        Ok(deposit)
    }

    pub async fn list_files(&self, deposit: &Deposit) -> Result<Vec<ObjectInfo>> {
        self.services.storage.list(self.services.db.read(), deposit.bucket_id).await
    }

    /// JSON envelope of a deposition
    pub async fn envelope(&self, deposit: &Deposit) -> Result<Value> {
        let db = self.services.db.read();
        let files = self.list_files(deposit).await?;

        let mut latest_draft = None;
        if let Some(conceptrecid) = deposit.conceptrecid {
            let concept = self
                .services
                .pids
                .get(db, "conceptrecid", &conceptrecid.to_string())
                .await?;
            if let Some(concept) = concept {
                latest_draft = versioning::draft_child(db, &concept)
                    .await?
                    .and_then(|pid| pid.pid_value.parse::<i32>().ok())
                    .filter(|d| *d != deposit.depid);
            }
        }

        Ok(envelope(&self.services.config.site, deposit, &files, latest_draft))
    }

    // ========================================================================
    // Creation and saves
    // ========================================================================

    /// Create a deposition, prefilled with defaults and the caller's metadata
    #[instrument(skip(self, metadata), fields(user_id = actor.user_id))]
    pub async fn create(&self, actor: &Actor, metadata: Option<Value>) -> Result<Deposit> {
        let services = &self.services;
        let mut draft = default_draft(services);
        if let Some(metadata) = &metadata {
            draft = merge(draft, &strip_reserved_keys(metadata)?);
            self.check(&mut draft, None, Mode::Save).await?;
        }

        let txn = services.db.write().begin().await?;
        ensure_user(&txn, actor).await?;
        let depid = services.pids.next_recid(&txn).await?;
        let bucket = services.storage.create_bucket(&txn, false).await?;

        let now = Utc::now();
        let deposit = DepositActiveModel {
            id: Set(Uuid::new_v4()),
            depid: Set(depid),
            owner_id: Set(actor.user_id),
            status: Set(DepositStatus::Draft.into()),
            draft: Set(draft),
            bucket_id: Set(bucket.id),
            recid: Set(None),
            conceptrecid: Set(None),
            errors: Set(None),
            created: Set(now.into()),
            updated: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        services
            .pids
            .create(
                &txn,
                NewPid::new("depid", depid.to_string())
                    .status(PidStatus::Registered)
                    .object(DEPOSIT_OBJECT_TYPE, deposit.id),
            )
            .await?;
        txn.commit().await?;

        info!(depid, bucket_id = %bucket.id, "Deposition created");
        Ok(deposit)
    }

    /// Replace the draft metadata
    #[instrument(skip(self, metadata), fields(user_id = actor.user_id))]
    pub async fn update(&self, actor: &Actor, depid: i32, metadata: &Value) -> Result<Deposit> {
        let deposit = self.get_for(actor, depid).await?;
        state::next(deposit.deposit_status(), Event::Save, deposit.recid.is_some())?;

        let mut draft = strip_reserved_keys(metadata)?;
        if let Some(prereserve) = deposit.draft.get("prereserve_doi") {
            if let Some(map) = draft.as_object_mut() {
                map.insert("prereserve_doi".into(), prereserve.clone());
            }
        }
        let allowed = self.allowed_local_doi(&deposit);
        self.check(&mut draft, allowed.as_deref(), Mode::Save).await?;

        let ttl = self.services.config.redis.draft_ttl_secs;
        let key = keys::draft_autosave(actor.user_id, depid);
        if let Err(e) = self.services.cache.set_with_ttl(&key, &draft, ttl).await {
            warn!(error = %e, "Failed to cache draft");
        }

        let mut active: DepositActiveModel = deposit.into();
        active.draft = Set(draft);
        active.errors = Set(None);
        active.updated = Set(Utc::now().into());
        active.update(self.services.db.write()).await.map_err(Into::into)
    }

    /// Local DOI a deposition may carry in its metadata
    pub fn allowed_local_doi(&self, deposit: &Deposit) -> Option<String> {
        let site = &self.services.config.site;
        if let Some(doi) = deposit.prereserved_doi() {
            return Some(doi.to_string());
        }
        deposit.recid.map(|recid| site.local_doi(&recid.to_string()))
    }

    /// Run the validation pass, resolving references against the knowledge base
    pub async fn check(&self, draft: &mut Value, allowed_doi: Option<&str>, mode: Mode) -> Result<()> {
        let db = self.services.db.read();
        let fresh = mode == Mode::Publish;
        let communities = referenced(draft, "communities", "identifier");
        let grants = referenced(draft, "grants", "id");
        let known_communities: HashSet<String> =
            self.services.kb.known_communities(db, &communities, fresh).await?;
        let known_grants: HashSet<String> = self.services.kb.known_grants(db, &grants, fresh).await?;

        let ctx = ValidationContext {
            site: &self.services.config.site,
            prereserved_doi: allowed_doi,
            communities: &known_communities,
            grants: &known_grants,
            today: Utc::now().date_naive(),
            mode,
        };
        validators::validate(draft, &ctx).into_result()
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Files change only in an editable state; otherwise the bucket counts as locked
    async fn writable(&self, actor: &Actor, depid: i32) -> Result<Deposit> {
        let deposit = self.get_for(actor, depid).await?;
        match state::next(deposit.deposit_status(), Event::ChangeFiles, deposit.recid.is_some()) {
            Ok(_) => Ok(deposit),
            Err(_) => Err(AppError::BucketLocked {
                bucket_id: deposit.bucket_id,
            }),
        }
    }

    pub async fn add_file(&self, actor: &Actor, depid: i32, filename: &str, data: &[u8]) -> Result<ObjectInfo> {
        let deposit = self.writable(actor, depid).await?;
        self.services
            .storage
            .add_object(self.services.db.write(), deposit.bucket_id, filename, data)
            .await
    }

    pub async fn remove_file(&self, actor: &Actor, depid: i32, key: &str) -> Result<()> {
        let deposit = self.writable(actor, depid).await?;
        self.services
            .storage
            .remove_object(self.services.db.write(), deposit.bucket_id, key)
            .await
    }

    pub async fn rename_file(&self, actor: &Actor, depid: i32, key: &str, new_key: &str) -> Result<ObjectInfo> {
        let deposit = self.writable(actor, depid).await?;
        self.services
            .storage
            .rename_object(self.services.db.write(), deposit.bucket_id, key, new_key)
            .await
    }

    pub async fn reorder_files(&self, actor: &Actor, depid: i32, keys: &[String]) -> Result<Vec<ObjectInfo>> {
        let deposit = self.writable(actor, depid).await?;
        let db = self.services.db.write();
        self.services.storage.reorder(db, deposit.bucket_id, keys).await?;
        self.services.storage.list(db, deposit.bucket_id).await
    }

    // ========================================================================
    // DOI pre-reservation
    // ========================================================================

    /// Reserve recid and DOI ahead of publication; idempotent
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn reserve_doi(&self, actor: &Actor, depid: i32) -> Result<Value> {
        let deposit = self.get_for(actor, depid).await?;
        if let Some(prereserve) = deposit.draft.get("prereserve_doi") {
            return Ok(prereserve.clone());
        }
        state::next(deposit.deposit_status(), Event::ReserveDoi, deposit.recid.is_some())?;

        let services = &self.services;
        let recid = deposit.depid.to_string();
        let doi = services.config.site.local_doi(&recid);

        let txn = services.db.write().begin().await?;
        for (pid_type, value) in [("recid", recid.as_str()), ("doi", doi.as_str())] {
            match services.pids.get(&txn, pid_type, value).await? {
                Some(pid) if pid.is_reserved() => {}
                Some(pid) if pid.is_new() => {
                    services.pids.reserve(&txn, &pid, None).await?;
                }
                Some(pid) => {
                    return Err(AppError::PidAlreadyRegistered {
                        pid_type: pid.pid_type,
                        pid_value: pid.pid_value,
                    })
                }
                None => {
                    services
                        .pids
                        .create(&txn, NewPid::new(pid_type, value).status(PidStatus::Reserved))
                        .await?;
                }
            }
        }

        let prereserve = json!({"doi": doi, "recid": deposit.depid});
        let mut draft = deposit.draft.clone();
        if let Some(map) = draft.as_object_mut() {
            map.insert("prereserve_doi".into(), prereserve.clone());
        }
        let mut active: DepositActiveModel = deposit.into();
        active.draft = Set(draft);
        active.updated = Set(Utc::now().into());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(depid, doi = %doi, "DOI pre-reserved");
        Ok(prereserve)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Draft metadata rebuilt from the published record
    fn draft_from_record(&self, record: &Record) -> Value {
        nested_to_legacy(&strip_for_draft(&record.json, &self.services.config.site))
    }

    /// Reopen a published deposition for editing
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn edit(&self, actor: &Actor, depid: i32) -> Result<Deposit> {
        let deposit = self.get_for(actor, depid).await?;
        let status = state::next(deposit.deposit_status(), Event::Edit, deposit.recid.is_some())?;
        let record = self.record_of(&deposit).await?;
        let draft = self.draft_from_record(&record);

        let txn = self.services.db.write().begin().await?;
        self.services.storage.set_locked(&txn, deposit.bucket_id, false).await?;
        let mut active: DepositActiveModel = deposit.into();
        active.status = Set(status.into());
        active.draft = Set(draft);
        active.errors = Set(None);
        active.updated = Set(Utc::now().into());
        let deposit = active.update(&txn).await?;
        txn.commit().await?;

        info!(depid, "Deposition reopened for editing");
        Ok(deposit)
    }

    /// Drop the changes of an edit and return to the published state
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn discard(&self, actor: &Actor, depid: i32) -> Result<Deposit> {
        let deposit = self.get_for(actor, depid).await?;
        let status = state::next(deposit.deposit_status(), Event::Discard, deposit.recid.is_some())?;
        let record = self.record_of(&deposit).await?;
        let draft = self.draft_from_record(&record);
        let record_bucket = record.record_bucket().ok_or_else(|| AppError::Integrity {
            message: format!("Record {} has no bucket", record.id),
        })?;

        let storage = &self.services.storage;
        let txn = self.services.db.write().begin().await?;
        let old_bucket = deposit.bucket_id;
        let changed = storage.signature(&txn, old_bucket).await? != storage.signature(&txn, record_bucket).await?;
        let bucket_id = if changed {
            storage.snapshot(&txn, record_bucket, true).await?.id
        } else {
            storage.set_locked(&txn, old_bucket, true).await?.id
        };

        let mut active: DepositActiveModel = deposit.into();
        active.status = Set(status.into());
        active.draft = Set(draft);
        active.bucket_id = Set(bucket_id);
        active.errors = Set(None);
        active.updated = Set(Utc::now().into());
        let deposit = active.update(&txn).await?;
        if changed {
            storage.delete_bucket(&txn, old_bucket).await?;
        }
        txn.commit().await?;

        if let Err(e) = self.services.cache.delete(&keys::draft_autosave(actor.user_id, depid)).await {
            warn!(error = %e, "Failed to clear draft cache");
        }
        info!(depid, files_restored = changed, "Edit discarded");
        Ok(deposit)
    }

    /// Park a running publication back into an editable state
    #[instrument(skip(self))]
    pub async fn halt(&self, depid: i32) -> Result<Deposit> {
        let deposit = self.get(depid).await?;
        let status = state::next(deposit.deposit_status(), Event::Halt, deposit.recid.is_some())?;

        let txn = self.services.db.write().begin().await?;
        self.services.storage.set_locked(&txn, deposit.bucket_id, false).await?;
        let mut active: DepositActiveModel = deposit.into();
        active.status = Set(status.into());
        active.updated = Set(Utc::now().into());
        let deposit = active.update(&txn).await?;
        txn.commit().await?;

        warn!(depid, status = %status, "Publication halted");
        Ok(deposit)
    }

    /// Open a draft for the next version of a published record.
    ///
    /// Returns the existing draft when the concept already has one.
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn new_version(&self, actor: &Actor, depid: i32) -> Result<Deposit> {
        let deposit = self.get_for(actor, depid).await?;
        state::next(deposit.deposit_status(), Event::NewVersion, deposit.recid.is_some())?;
        let services = &self.services;

        let conceptrecid = deposit.conceptrecid.ok_or_else(|| AppError::Integrity {
            message: format!("Deposition {} has no concept", depid),
        })?;
        let db = services.db.read();
        let concept = services
            .pids
            .get_required(db, "conceptrecid", &conceptrecid.to_string())
            .await?;

        if let Some(draft) = versioning::draft_child(db, &concept).await? {
            let existing: i32 = draft.pid_value.parse().map_err(|_| AppError::Integrity {
                message: format!("Draft version {} is not a deposition id", draft.pid_value),
            })?;
            info!(depid = existing, "New version draft already exists");
            return self.get(existing).await;
        }

        let last = versioning::last_child(db, &concept)
            .await?
            .ok_or_else(|| AppError::Integrity {
                message: format!("Concept {} has no published version", conceptrecid),
            })?;
        let record = records::get_by_recid(db, &services.pids, &last.pid_value).await?;
        let record_bucket = record.record_bucket().ok_or_else(|| AppError::Integrity {
            message: format!("Record {} has no bucket", record.id),
        })?;

        let mut draft = self.draft_from_record(&record);
        if let Some(map) = draft.as_object_mut() {
            map.remove("doi");
            map.remove("prereserve_doi");
        }

        let txn = services.db.write().begin().await?;
        let new_depid = services.pids.next_recid(&txn).await?;
        let bucket = services.storage.snapshot(&txn, record_bucket, false).await?;

        let now = Utc::now();
        let new_deposit = DepositActiveModel {
            id: Set(Uuid::new_v4()),
            depid: Set(new_depid),
            owner_id: Set(deposit.owner_id),
            status: Set(DepositStatus::Draft.into()),
            draft: Set(draft),
            bucket_id: Set(bucket.id),
            recid: Set(None),
            conceptrecid: Set(Some(conceptrecid)),
            errors: Set(None),
            created: Set(now.into()),
            updated: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        services
            .pids
            .create(
                &txn,
                NewPid::new("depid", new_depid.to_string())
                    .status(PidStatus::Registered)
                    .object(DEPOSIT_OBJECT_TYPE, new_deposit.id),
            )
            .await?;
        let recid = services
            .pids
            .create(
                &txn,
                NewPid::new("recid", new_depid.to_string()).status(PidStatus::Reserved),
            )
            .await?;
        versioning::insert_draft_child(&txn, &concept, &recid).await?;
        txn.commit().await?;

        info!(depid = new_depid, concept = conceptrecid, "New version draft created");
        Ok(new_deposit)
    }

    /// Delete an unpublished deposition with its identifiers and bucket
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn delete(&self, actor: &Actor, depid: i32) -> Result<()> {
        let deposit = self.get_for(actor, depid).await?;
        state::next(deposit.deposit_status(), Event::Delete, deposit.recid.is_some())?;
        let services = &self.services;
        let value = deposit.depid.to_string();

        let txn = services.db.write().begin().await?;

        if let Some(recid) = services.pids.get(&txn, "recid", &value).await? {
            if let Some(conceptrecid) = deposit.conceptrecid {
                let concept = services.pids.get(&txn, "conceptrecid", &conceptrecid.to_string()).await?;
                if let Some(concept) = concept {
                    versioning::remove_draft_child(&txn, &concept, &recid).await?;
                }
            }
            if !recid.is_deleted() {
                services.pids.delete(&txn, &recid).await?;
            }
        }
        if let Some(doi) = deposit.prereserved_doi() {
            if let Some(pid) = services.pids.get(&txn, "doi", doi).await? {
                if !pid.is_deleted() {
                    services.pids.delete(&txn, &pid).await?;
                }
            }
        }
        if let Some(pid) = services.pids.get(&txn, "depid", &value).await? {
            services.pids.delete(&txn, &pid).await?;
        }

        SipEntity::delete_many()
            .filter(SipColumn::DepositId.eq(deposit.id))
            .exec(&txn)
            .await?;
        DepositEntity::delete_by_id(deposit.id).exec(&txn).await?;
        services.storage.delete_bucket(&txn, deposit.bucket_id).await?;
        txn.commit().await?;

        if let Err(e) = services.cache.delete(&keys::draft_autosave(deposit.owner_id, depid)).await {
            warn!(error = %e, "Failed to clear draft cache");
        }
        info!(depid, "Deposition deleted");
        Ok(())
    }

    async fn record_of(&self, deposit: &Deposit) -> Result<Record> {
        let recid = deposit.recid.ok_or_else(|| AppError::Precondition {
            message: format!("Deposition {} is not published", deposit.depid),
        })?;
        records::get_by_recid(self.services.db.read(), &self.services.pids, &recid.to_string()).await
    }
}

pub async fn find_deposit<C: ConnectionTrait>(db: &C, depid: i32) -> Result<Deposit> {
    DepositEntity::find()
        .filter(DepositColumn::Depid.eq(depid))
        .one(db)
        .await?
        .ok_or_else(|| AppError::DepositNotFound { id: depid.to_string() })
}

/// Owners and admins only
pub fn authorize(deposit: &Deposit, actor: &Actor) -> Result<()> {
    if actor.is_admin || deposit.owner_id == actor.user_id {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            message: format!("User {} does not own deposition {}", actor.user_id, deposit.depid),
        })
    }
}

/// Incoming metadata minus the keys only the server writes
fn strip_reserved_keys(metadata: &Value) -> Result<Value> {
    let Some(map) = metadata.as_object() else {
        return Err(AppError::field("metadata", "Metadata must be an object."));
    };
    let mut map = map.clone();
    map.remove("prereserve_doi");
    Ok(Value::Object(map))
}

/// Identifiers listed under `field` as `[{key: id}]`
pub(crate) fn referenced(draft: &Value, field: &str, key: &str) -> Vec<String> {
    draft
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get(key).and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
