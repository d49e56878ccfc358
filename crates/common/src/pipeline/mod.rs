//! Publication pipeline
//!
//! Provides:
//! - Prefill and publish-mode validation of the deposition draft
//! - Identifier reservation and DOI minting
//! - Record creation (or update of the edited record) from a sealed SIP
//! - Record bucket snapshot, reuse, and the unchanged-files check for versions
//! - Post-commit task scheduling
//!
//! The deposition is moved to `inprogress` (bucket locked) in its own
//! transaction, guarded on its stored status so only one publish call can
//! claim it. Every record-side effect then happens in a second
//! transaction; when that fails the deposition is parked back in an
//! editable state with the error map stored on it, unless it has already
//! left `inprogress`.

pub mod postprocess;

use crate::cache::keys;
use crate::db::models::*;
use crate::deposit::{self, state, Actor, DepositService, Event};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::oaiset;
use crate::pidstore::NewPid;
use crate::records::{self, RECORD_OBJECT_TYPE};
use crate::services::Services;
use crate::tasks::Task;
use crate::translator::legacy_to_nested;
use crate::validators::Mode;
use crate::versioning;
use chrono::Utc;
use postprocess::{file_entries, file_firerole, owner_block, postprocess, PostprocessContext};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Statuses a publication can start from
const EDITABLE: [DepositStatus; 2] = [DepositStatus::Draft, DepositStatus::Edited];

/// Result of a publish call
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub deposit: Deposit,
    pub record: Record,
    pub recid: i32,
    /// False when the deposition was already published and nothing ran
    pub published: bool,
    /// Tasks scheduled after the commit
    pub tasks: Vec<Task>,
}

/// Identifiers settled by the record transaction
struct Minted {
    record: Record,
    recid: i32,
    conceptrecid: Option<i32>,
    previous: Option<Pid>,
}

#[derive(Clone)]
pub struct Publisher {
    deposits: DepositService,
}

impl Publisher {
    pub fn new(services: Services) -> Self {
        Self {
            deposits: DepositService::new(services),
        }
    }

    fn services(&self) -> &Services {
        self.deposits.services()
    }

    /// Stored draft layered over the autosaved form and the site defaults
    pub async fn prefill(&self, deposit: &Deposit) -> Value {
        let services = self.services();
        let mut draft = deposit::default_draft(services);
        let key = keys::draft_autosave(deposit.owner_id, deposit.depid);
        match services.cache.get::<Value>(&key).await {
            Ok(Some(cached)) => draft = deposit::merge(draft, &cached),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read draft cache"),
        }
        deposit::merge(draft, &deposit.draft)
    }

    /// Publish a deposition. Publishing an already published deposition
    /// returns its record unchanged.
    #[instrument(skip(self), fields(user_id = actor.user_id))]
    pub async fn publish(&self, actor: &Actor, depid: i32) -> Result<PublishOutcome> {
        let services = self.services();
        let started = Instant::now();
        let deposit = self.deposits.get_for(actor, depid).await?;

        if deposit.deposit_status() == DepositStatus::Published {
            return self.already_published(deposit).await;
        }
        let running = state::next(deposit.deposit_status(), Event::Publish, deposit.recid.is_some())?;

        // Form checks; failures are stored on the deposition and returned
        let mut draft = self.prefill(&deposit).await;
        let allowed = self.deposits.allowed_local_doi(&deposit);
        let mut checked = self.deposits.check(&mut draft, allowed.as_deref(), Mode::Publish).await;
        if checked.is_ok() && services.storage.list(services.db.read(), deposit.bucket_id).await?.is_empty() {
            checked = Err(AppError::MissingFiles);
        }
        if let Err(e) = checked {
            self.store_errors(deposit, &e).await?;
            metrics::record_publication(started.elapsed().as_secs_f64(), "rejected");
            return Err(e);
        }

        let deposit = match self.claim(&deposit, running, &draft).await? {
            Some(claimed) => claimed,
            None => {
                // Another call got there first
                let current = self.deposits.get(depid).await?;
                if current.deposit_status() == DepositStatus::Published {
                    return self.already_published(current).await;
                }
                warn!(depid, status = %current.deposit_status(), "Publication already running");
                return Err(AppError::Conflict {
                    message: format!("Deposition {} is already being published", depid),
                });
            }
        };

        let txn = services.db.write().begin().await?;
        let result = match self.run(&txn, actor, &deposit, &draft).await {
            Ok(minted) => finish(&txn, deposit.clone(), &minted).await.map(|d| (d, minted)),
            Err(e) => Err(e),
        };
        let (deposit, minted) = match result {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                error!(depid, error = %e, "Publication failed");
                self.compensate(deposit, &e).await?;
                metrics::record_publication(started.elapsed().as_secs_f64(), "failed");
                return Err(e);
            }
        };
        txn.commit().await?;

        if let Err(e) = services.cache.delete(&keys::draft_autosave(deposit.owner_id, depid)).await {
            warn!(error = %e, "Failed to clear draft cache");
        }

        let tasks = self.schedule(&minted).await;
        metrics::record_publication(started.elapsed().as_secs_f64(), "published");
        info!(depid, recid = minted.recid, record_id = %minted.record.id, "Deposition published");

        Ok(PublishOutcome {
            deposit,
            recid: minted.recid,
            record: minted.record,
            published: true,
            tasks,
        })
    }

    async fn already_published(&self, deposit: Deposit) -> Result<PublishOutcome> {
        let services = self.services();
        let recid = deposit.recid.ok_or_else(|| AppError::Integrity {
            message: format!("Published deposition {} has no recid", deposit.depid),
        })?;
        let record = records::get_by_recid(services.db.read(), &services.pids, &recid.to_string()).await?;
        info!(depid = deposit.depid, recid, "Deposition already published");
        Ok(PublishOutcome {
            deposit,
            record,
            recid,
            published: false,
            tasks: Vec::new(),
        })
    }

    /// Move an editable deposition to `running` and freeze its files.
    ///
    /// The update only matches while the stored status is still editable;
    /// `None` means another call changed it since `deposit` was read.
    async fn claim(&self, deposit: &Deposit, running: DepositStatus, draft: &Value) -> Result<Option<Deposit>> {
        let services = self.services();
        let txn = services.db.write().begin().await?;
        let claimed = DepositEntity::update_many()
            .set(DepositActiveModel {
                status: Set(running.into()),
                draft: Set(draft.clone()),
                errors: Set(None),
                updated: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(DepositColumn::Id.eq(deposit.id))
            .filter(DepositColumn::Status.is_in(EDITABLE.iter().map(DepositStatus::as_str)))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        services.storage.set_locked(&txn, deposit.bucket_id, true).await?;
        let claimed = DepositEntity::find_by_id(deposit.id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::DepositNotFound {
                id: deposit.depid.to_string(),
            })?;
        txn.commit().await?;
        Ok(Some(claimed))
    }

    /// Record-side steps, all inside one transaction
    async fn run(&self, txn: &DatabaseTransaction, actor: &Actor, deposit: &Deposit, draft: &Value) -> Result<Minted> {
        let services = self.services();
        let site = &services.config.site;
        let pids = &services.pids;

        let existing = match deposit.recid {
            Some(recid) => Some(records::get_by_recid(txn, pids, &recid.to_string()).await?),
            None => None,
        };
        let record_id = existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4);

        let owner = UserEntity::find_by_id(deposit.owner_id)
            .one(txn)
            .await?
            .ok_or_else(|| AppError::not_found("user", deposit.owner_id))?;
        let owner = Actor {
            user_id: owner.id,
            email: owner.email,
            username: owner.username,
            is_admin: false,
            ip_address: None,
        };

        // SIP, sealed once the record is in place
        let files = services.storage.list(txn, deposit.bucket_id).await?;
        let sip = SipActiveModel {
            id: Set(Uuid::new_v4()),
            deposit_id: Set(deposit.id),
            metadata: Set(draft.clone()),
            files: Set(serde_json::to_value(&files)?),
            agent: Set(Some(json!({"email": actor.email, "ip_address": actor.ip_address}))),
            sealed: Set(false),
            created: Set(Utc::now().into()),
        }
        .insert(txn)
        .await?;

        // Record identifier: the deposition id unless already published
        let recid = deposit
            .recid
            .or_else(|| deposit.prereserved_recid())
            .unwrap_or(deposit.depid);
        let recid_pid = match pids.get(txn, "recid", &recid.to_string()).await? {
            Some(pid) if pid.is_registered() && existing.is_none() => {
                return Err(AppError::PidAlreadyRegistered {
                    pid_type: pid.pid_type,
                    pid_value: pid.pid_value,
                })
            }
            Some(pid) => pid,
            None => {
                pids.create(txn, NewPid::new("recid", recid.to_string()).status(PidStatus::Reserved))
                    .await?
            }
        };

        // DOI
        let doi = draft
            .get("doi")
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| site.local_doi(&recid.to_string()));
        let doi_pid = match pids.get(txn, "doi", &doi).await? {
            Some(pid) => pid,
            None if site.is_local_doi(&doi) => {
                pids.create(txn, NewPid::new("doi", doi.as_str()).status(PidStatus::Reserved))
                    .await?
            }
            None => {
                pids.create(
                    txn,
                    NewPid::new("doi", doi.as_str())
                        .status(PidStatus::Registered)
                        .provider("external"),
                )
                .await?
            }
        };
        pids.assign(txn, &doi_pid, RECORD_OBJECT_TYPE, record_id, false).await?;

        // Metadata
        let license_id = draft.get("license").and_then(Value::as_str).unwrap_or_default();
        let license = if license_id.is_empty() {
            None
        } else {
            services.kb.license(txn, license_id).await?
        };
        let mut grants = HashMap::new();
        for id in deposit::referenced(draft, "grants", "id") {
            if let Some(grant) = services.kb.grant(txn, &id).await? {
                grants.insert(id, grant);
            }
        }
        let mut accepted: HashSet<String> = existing.as_ref().map(|r| r.communities()).unwrap_or_default().into_iter().collect();
        for id in deposit::referenced(draft, "communities", "identifier") {
            if let Some(community) = services.kb.community(txn, &id).await? {
                if community.owner_id == owner.user_id {
                    accepted.insert(id);
                }
            }
        }
        let ctx = PostprocessContext {
            site,
            owner: &owner,
            depid: deposit.depid,
            license: license.as_ref(),
            grants: &grants,
            accepted: &accepted,
        };
        let mut json = postprocess(legacy_to_nested(draft), &ctx);

        // Files
        let record_bucket = self.record_bucket(txn, deposit, existing.as_ref()).await?;
        let record_files = services.storage.list(txn, record_bucket).await?;
        let firerole = file_firerole(&json, &owner.email);

        // Concept identifiers
        let (conceptrecid, concept_pid) = match (deposit.conceptrecid, &existing) {
            (Some(conceptrecid), _) => {
                let concept = pids.get_required(txn, "conceptrecid", &conceptrecid.to_string()).await?;
                (conceptrecid, concept)
            }
            (None, Some(record)) => {
                let value = record
                    .json
                    .get("conceptrecid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AppError::Integrity {
                        message: format!("Record {} has no concept", record.id),
                    })?;
                let concept = pids.get_required(txn, "conceptrecid", value).await?;
                let conceptrecid = value.parse().map_err(|_| AppError::Integrity {
                    message: format!("Invalid conceptrecid {}", value),
                })?;
                (conceptrecid, concept)
            }
            (None, None) => {
                let conceptrecid = pids.next_recid(txn).await?;
                let concept = pids
                    .create(
                        txn,
                        NewPid::new("conceptrecid", conceptrecid.to_string()).status(PidStatus::Registered),
                    )
                    .await?;
                if site.is_local_doi(&doi) {
                    let conceptdoi = site.local_doi(&conceptrecid.to_string());
                    pids.create(txn, NewPid::new("doi", conceptdoi).status(PidStatus::Reserved))
                        .await?;
                }
                (conceptrecid, concept)
            }
        };
        let conceptdoi = site.local_doi(&conceptrecid.to_string());
        let has_conceptdoi = pids.get(txn, "doi", &conceptdoi).await?.is_some();

        if let Some(meta) = json.as_object_mut() {
            meta.insert("recid".into(), json!(recid));
            meta.insert("doi".into(), json!(doi));
            meta.insert("conceptrecid".into(), json!(conceptrecid.to_string()));
            if has_conceptdoi {
                meta.insert("conceptdoi".into(), json!(conceptdoi));
            }
            meta.insert("_files".into(), Value::Array(file_entries(&record_files, &firerole)));
            meta.insert(
                "_buckets".into(),
                json!({"record": record_bucket.to_string(), "deposit": deposit.bucket_id.to_string()}),
            );
            meta.insert(
                "_deposit".into(),
                json!({
                    "id": deposit.depid.to_string(),
                    "owners": [deposit.owner_id],
                    "created_by": deposit.owner_id,
                    "pid": {"type": "recid", "value": recid.to_string()},
                    "status": DepositStatus::Published.as_str(),
                }),
            );
            if let Some(record) = &existing {
                for key in ["_oai", "_internal"] {
                    if let Some(value) = record.json.get(key) {
                        meta.insert(key.into(), value.clone());
                    }
                }
            }
        }

        // Record
        let record = match existing {
            Some(record) => records::commit(txn, record, json.clone()).await?,
            None => records::create(txn, record_id, json.clone()).await?,
        };
        if !recid_pid.is_registered() {
            pids.register(txn, &recid_pid, &site.record_url(&recid.to_string()), None)
                .await?;
        }
        pids.assign(txn, &recid_pid, RECORD_OBJECT_TYPE, record.id, false).await?;
        let recid_pid = pids.get_required(txn, "recid", &recid.to_string()).await?;
        let previous = versioning::publish_child(txn, &concept_pid, &recid_pid).await?;

        let patterns = oaiset::pattern_sets(txn).await?;
        let (record, _) = oaiset::sync_record(txn, pids, site, &patterns, record).await?;

        // Seal
        let mut metadata = json;
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert("owner".into(), owner_block(&owner, deposit.depid));
        }
        let mut sip: SipActiveModel = sip.into();
        sip.metadata = Set(metadata);
        sip.sealed = Set(true);
        sip.update(txn).await?;

        Ok(Minted {
            record,
            recid,
            conceptrecid: Some(conceptrecid),
            previous,
        })
    }

    /// Bucket the record files live in.
    ///
    /// An edit keeps the record bucket when the files did not change. A new
    /// version must differ from every earlier version.
    async fn record_bucket<C: ConnectionTrait>(&self, db: &C, deposit: &Deposit, existing: Option<&Record>) -> Result<Uuid> {
        let services = self.services();
        let storage = &services.storage;
        let signature = storage.signature(db, deposit.bucket_id).await?;

        if let Some(record) = existing {
            if let Some(current) = record.record_bucket() {
                if storage.signature(db, current).await? == signature {
                    return Ok(current);
                }
            }
            return Ok(storage.snapshot(db, deposit.bucket_id, true).await?.id);
        }

        if let Some(conceptrecid) = deposit.conceptrecid {
            let concept = services
                .pids
                .get_required(db, "conceptrecid", &conceptrecid.to_string())
                .await?;
            for version in versioning::children(db, &concept).await? {
                let record = records::get_by_recid(db, &services.pids, &version.pid_value).await?;
                let Some(bucket) = record.record_bucket() else {
                    continue;
                };
                if storage.signature(db, bucket).await? == signature {
                    return Err(AppError::UnchangedFiles);
                }
            }
        }

        Ok(storage.snapshot(db, deposit.bucket_id, true).await?.id)
    }

    async fn store_errors(&self, deposit: Deposit, error: &AppError) -> Result<()> {
        DepositEntity::update_many()
            .set(DepositActiveModel {
                errors: Set(Some(error_map(error))),
                updated: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(DepositColumn::Id.eq(deposit.id))
            .filter(DepositColumn::Status.is_in(EDITABLE.iter().map(DepositStatus::as_str)))
            .exec(self.services().db.write())
            .await?;
        Ok(())
    }

    /// Park a failed publication back in its editable state. A deposition
    /// that already left `inprogress` is not touched.
    async fn compensate(&self, deposit: Deposit, error: &AppError) -> Result<()> {
        let status = state::next(deposit.deposit_status(), Event::Fail, deposit.recid.is_some())?;
        let txn = self.services().db.write().begin().await?;
        let parked = DepositEntity::update_many()
            .set(DepositActiveModel {
                status: Set(status.into()),
                errors: Set(Some(error_map(error))),
                updated: Set(Utc::now().into()),
                ..Default::default()
            })
            .filter(DepositColumn::Id.eq(deposit.id))
            .filter(DepositColumn::Status.eq(DepositStatus::InProgress.as_str()))
            .exec(&txn)
            .await?;
        if parked.rows_affected == 0 {
            txn.rollback().await?;
            warn!(depid = deposit.depid, "Deposition is no longer running, leaving it as is");
            return Ok(());
        }

        self.services().storage.set_locked(&txn, deposit.bucket_id, false).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Post-commit steps, in order. Queue failures never undo the publication.
    async fn schedule(&self, minted: &Minted) -> Vec<Task> {
        let services = self.services();
        let record_id = minted.record.id;
        let mut tasks = vec![
            Task::IndexRecord { record_id },
            Task::RegisterDoi {
                recid: minted.recid.to_string(),
            },
            Task::NotifyCommunities { record_id },
            Task::PreservationScore { record_id },
        ];
        if let Some(previous) = &minted.previous {
            match records::get_by_recid(services.db.read(), &services.pids, &previous.pid_value).await {
                Ok(record) => tasks.push(Task::IndexRecord { record_id: record.id }),
                Err(e) => warn!(recid = %previous.pid_value, error = %e, "Previous version not found"),
            }
        }

        for task in &tasks {
            if let Err(e) = services.queue.push(task.clone()).await {
                warn!(task = task.name(), error = %e, "Failed to schedule task");
            }
        }
        tasks
    }
}

/// Status, recid and concept written back to the deposition
async fn finish(txn: &DatabaseTransaction, deposit: Deposit, minted: &Minted) -> Result<Deposit> {
    let status = state::next(deposit.deposit_status(), Event::Complete, true)?;
    let mut active: DepositActiveModel = deposit.into();
    active.status = Set(status.into());
    active.recid = Set(Some(minted.recid));
    active.conceptrecid = Set(minted.conceptrecid);
    active.errors = Set(None);
    active.updated = Set(Utc::now().into());
    active.update(txn).await.map_err(Into::into)
}

fn error_map(error: &AppError) -> Value {
    error
        .details()
        .unwrap_or_else(|| json!({"message": [error.to_string()]}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::firerole::Firerole;
    use crate::queue::MemoryTaskQueue;
    use chrono::NaiveDate;
    use std::sync::Arc;

    struct Fixture {
        services: Services,
        deposits: DepositService,
        publisher: Publisher,
        queue: Arc<MemoryTaskQueue>,
        owner: Actor,
    }

    async fn fixture() -> Fixture {
        let queue = Arc::new(MemoryTaskQueue::new());
        let services = Services::in_memory().await.unwrap().with_queue(queue.clone());
        LicenseActiveModel {
            id: Set("cc-by".into()),
            title: Set("Creative Commons Attribution 4.0".into()),
            url: Set(Some("https://creativecommons.org/licenses/by/4.0/".into())),
            is_open: Set(true),
        }
        .insert(services.db.write())
        .await
        .unwrap();

        Fixture {
            deposits: DepositService::new(services.clone()),
            publisher: Publisher::new(services.clone()),
            services,
            queue,
            owner: Actor::user(1, "owner@example.org"),
        }
    }

    fn metadata() -> Value {
        json!({
            "title": "Test title",
            "creators": [{"name": "Doe, John", "affiliation": "Atlantis"}],
            "description": "Test",
            "publication_date": "2013-05-08",
            "upload_type": "presentation",
            "access_right": "open"
        })
    }

    async fn draft_with_file(f: &Fixture, metadata: Value) -> Deposit {
        let deposit = f.deposits.create(&f.owner, None).await.unwrap();
        f.deposits.update(&f.owner, deposit.depid, &metadata).await.unwrap();
        f.deposits
            .add_file(&f.owner, deposit.depid, "test-1.txt", b"test-1.txt")
            .await
            .unwrap();
        deposit
    }

    #[tokio::test]
    async fn test_simple_publication() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;

        let outcome = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        assert!(outcome.published);
        assert_eq!(outcome.recid, deposit.depid);
        assert_eq!(outcome.deposit.deposit_status(), DepositStatus::Published);

        let db = f.services.db.read();
        let record = records::get_by_recid(db, &f.services.pids, &outcome.recid.to_string())
            .await
            .unwrap();
        let doi = format!("10.5281/zenodo.{}", outcome.recid);
        assert_eq!(record.json["doi"], json!(doi));
        assert_eq!(record.json["title"], "Test title");
        assert_eq!(record.json["license"]["identifier"], "cc-by");
        assert_eq!(record.json["owners"], json!([1]));
        assert_eq!(record.json["provisional_communities"], json!(["zenodo"]));
        assert_eq!(record.json["_files"][0]["key"], "test-1.txt");
        assert_eq!(record.json["_files"][0]["restriction"], "firerole: allow any");
        assert!(record.json["_oai"]["id"].is_string());

        let recid = f.services.pids.get_required(db, "recid", &outcome.recid.to_string()).await.unwrap();
        assert!(recid.is_registered());
        assert_eq!(recid.object_uuid, Some(record.id));
        let doi_pid = f.services.pids.get_required(db, "doi", &doi).await.unwrap();
        assert!(doi_pid.is_reserved());

        let bucket = f.services.storage.get_bucket(db, outcome.deposit.bucket_id).await.unwrap();
        assert!(bucket.locked);
        let record_bucket = record.record_bucket().unwrap();
        assert!(f.services.storage.get_bucket(db, record_bucket).await.unwrap().locked);

        let sips = SipEntity::find().all(db).await.unwrap();
        assert_eq!(sips.len(), 1);
        assert!(sips[0].sealed);
        assert_eq!(sips[0].metadata["owner"]["deposition_id"], deposit.depid);

        let names: Vec<&str> = outcome.tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["index_record", "register_doi", "notify_communities", "preservation_score"]);
        assert_eq!(f.queue.pending().await.len(), 4);

        let err = f.deposits.update(&f.owner, deposit.depid, &metadata()).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 403);
        let err = f
            .deposits
            .add_file(&f.owner, deposit.depid, "late.txt", b"late")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BucketLocked { .. }));
    }

    #[tokio::test]
    async fn test_publish_twice_is_a_noop() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;

        let first = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        let second = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        assert!(!second.published);
        assert_eq!(first.recid, second.recid);
        assert_eq!(first.record.json["doi"], second.record.json["doi"]);
        assert_eq!(first.record.json["_oai"]["id"], second.record.json["_oai"]["id"]);
        assert_eq!(first.record.version_id, second.record.version_id);
    }

    #[tokio::test]
    async fn test_concurrent_publish_runs_once() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;

        let (a, b) = tokio::join!(
            f.publisher.publish(&f.owner, deposit.depid),
            f.publisher.publish(&f.owner, deposit.depid)
        );
        let outcomes: Vec<PublishOutcome> = [a, b]
            .into_iter()
            .filter_map(|r| match r {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    assert!(matches!(e, AppError::Conflict { .. }), "{:?}", e);
                    None
                }
            })
            .collect();
        assert_eq!(outcomes.iter().filter(|o| o.published).count(), 1);

        let db = f.services.db.read();
        let stored = f.deposits.get(deposit.depid).await.unwrap();
        assert_eq!(stored.deposit_status(), DepositStatus::Published);
        assert!(f.services.storage.get_bucket(db, stored.bucket_id).await.unwrap().locked);
        assert_eq!(RecordEntity::find().all(db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_claim_or_park() {
        let f = fixture().await;
        let stale = draft_with_file(&f, metadata()).await;
        let stale = f.deposits.get(stale.depid).await.unwrap();
        f.publisher.publish(&f.owner, stale.depid).await.unwrap();

        // A call that read the draft before the publication committed
        let claimed = f
            .publisher
            .claim(&stale, DepositStatus::InProgress, &stale.draft)
            .await
            .unwrap();
        assert!(claimed.is_none());

        let mut running = stale.clone();
        running.status = DepositStatus::InProgress.into();
        f.publisher.compensate(running, &AppError::UnchangedFiles).await.unwrap();

        let db = f.services.db.read();
        let stored = f.deposits.get(stale.depid).await.unwrap();
        assert_eq!(stored.deposit_status(), DepositStatus::Published);
        assert!(stored.errors.is_none());
        assert!(f.services.storage.get_bucket(db, stored.bucket_id).await.unwrap().locked);

        // The repeated call returns the record instead of publishing again
        let again = f.publisher.publish(&f.owner, stale.depid).await.unwrap();
        assert!(!again.published);
    }

    #[tokio::test]
    async fn test_missing_files_keeps_draft() {
        let f = fixture().await;
        let deposit = f.deposits.create(&f.owner, Some(metadata())).await.unwrap();

        let err = f.publisher.publish(&f.owner, deposit.depid).await.unwrap_err();
        assert!(matches!(err, AppError::MissingFiles));

        let deposit = f.deposits.get(deposit.depid).await.unwrap();
        assert_eq!(deposit.deposit_status(), DepositStatus::Draft);
        assert_eq!(deposit.draft["title"], "Test title");
        assert!(deposit.errors.unwrap()["message"].is_array());
    }

    #[tokio::test]
    async fn test_invalid_fields_are_stored() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, json!({"title": "Only a title"})).await;

        let err = f.publisher.publish(&f.owner, deposit.depid).await.unwrap_err();
        let AppError::InvalidFields { errors } = err else {
            panic!("expected field errors");
        };
        assert!(errors.contains_key("creators"));

        let deposit = f.deposits.get(deposit.depid).await.unwrap();
        assert_eq!(deposit.deposit_status(), DepositStatus::Draft);
        assert!(deposit.errors.unwrap().get("creators").is_some());
        let db = f.services.db.read();
        assert!(!f.services.storage.get_bucket(db, deposit.bucket_id).await.unwrap().locked);
    }

    #[tokio::test]
    async fn test_prefill_prefers_stored_draft() {
        let f = fixture().await;
        let deposit = f.deposits.create(&f.owner, Some(json!({"title": "Stored"}))).await.unwrap();
        f.services
            .cache
            .set(
                &keys::draft_autosave(f.owner.user_id, deposit.depid),
                &json!({"title": "Cached", "notes": "from the form"}),
            )
            .await
            .unwrap();

        let draft = f.publisher.prefill(&deposit).await;
        assert_eq!(draft["title"], "Stored");
        assert_eq!(draft["notes"], "from the form");
        assert_eq!(draft["access_right"], "open");
    }

    #[tokio::test]
    async fn test_new_version_with_identical_files() {
        let f = fixture().await;
        let v1 = draft_with_file(&f, metadata()).await;
        let first = f.publisher.publish(&f.owner, v1.depid).await.unwrap();

        let v2 = f.deposits.new_version(&f.owner, v1.depid).await.unwrap();
        assert_eq!(v2.conceptrecid, first.deposit.conceptrecid);
        let again = f.deposits.new_version(&f.owner, v1.depid).await.unwrap();
        assert_eq!(again.depid, v2.depid);

        let err = f.publisher.publish(&f.owner, v2.depid).await.unwrap_err();
        assert!(matches!(err, AppError::UnchangedFiles));
        assert_eq!(err.status_code().as_u16(), 400);
        let parked = f.deposits.get(v2.depid).await.unwrap();
        assert_eq!(parked.deposit_status(), DepositStatus::Draft);

        f.deposits.add_file(&f.owner, v2.depid, "test-2.txt", b"test-2.txt").await.unwrap();
        let second = f.publisher.publish(&f.owner, v2.depid).await.unwrap();
        assert_ne!(second.record.record_bucket(), first.record.record_bucket());
        assert_eq!(second.record.json["conceptrecid"], first.record.json["conceptrecid"]);
        assert_ne!(second.record.json["doi"], first.record.json["doi"]);

        // The previous last version is re-indexed
        assert!(second
            .tasks
            .iter()
            .any(|t| matches!(t, Task::IndexRecord { record_id } if *record_id == first.record.id)));

        let db = f.services.db.read();
        let concept = f
            .services
            .pids
            .get_required(db, "conceptrecid", first.record.json["conceptrecid"].as_str().unwrap())
            .await
            .unwrap();
        let children = versioning::children(db, &concept).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(versioning::draft_child(db, &concept).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embargoed_files_are_restricted() {
        let f = fixture().await;
        let mut meta = metadata();
        meta["access_right"] = json!("embargoed");
        meta["embargo_date"] = json!("2099-01-01");
        meta["license"] = json!("cc-by");
        let deposit = draft_with_file(&f, meta).await;

        let outcome = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        let restriction = outcome.record.json["_files"][0]["restriction"].as_str().unwrap();
        assert_eq!(
            restriction,
            "firerole: allow email \"owner@example.org\"\ndeny until \"2099-01-01\"\nallow any"
        );

        let rule = Firerole::parse(restriction).unwrap();
        let before = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2099, 1, 2).unwrap();
        assert!(!rule.allows(None, before));
        assert!(rule.allows(Some("owner@example.org"), before));
        assert!(rule.allows(None, after));
    }

    #[tokio::test]
    async fn test_prereserved_doi_is_minted() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;
        let reserved = f.deposits.reserve_doi(&f.owner, deposit.depid).await.unwrap();
        let doi = reserved["doi"].as_str().unwrap().to_string();

        let mut meta = metadata();
        meta["doi"] = json!(doi);
        f.deposits.update(&f.owner, deposit.depid, &meta).await.unwrap();

        let outcome = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        assert_eq!(outcome.record.json["doi"], json!(doi));
        assert_eq!(outcome.recid, deposit.depid);
        assert!(outcome.record.json.get("prereserve_doi").is_none());
    }

    #[tokio::test]
    async fn test_foreign_local_doi_fails_publish() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;
        f.deposits.reserve_doi(&f.owner, deposit.depid).await.unwrap();

        // Written behind the form's back
        let stored = f.deposits.get(deposit.depid).await.unwrap();
        let mut draft = stored.draft.clone();
        draft["doi"] = json!("10.5281/zenodo.424242");
        let mut active: DepositActiveModel = stored.into();
        active.draft = Set(draft);
        active.update(f.services.db.write()).await.unwrap();

        let err = f.publisher.publish(&f.owner, deposit.depid).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidLocalDoi { .. }));
    }

    #[tokio::test]
    async fn test_external_doi_is_registered() {
        let f = fixture().await;
        let mut meta = metadata();
        meta["doi"] = json!("10.1234/external.1");
        let deposit = draft_with_file(&f, meta).await;

        let outcome = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();
        let db = f.services.db.read();
        let pid = f.services.pids.get_required(db, "doi", "10.1234/external.1").await.unwrap();
        assert!(pid.is_registered());
        assert_eq!(pid.pid_provider.as_deref(), Some("external"));
        assert!(outcome.record.json.get("conceptdoi").is_none());
    }

    #[tokio::test]
    async fn test_edit_and_republish() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;
        let first = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();

        let edited = f.deposits.edit(&f.owner, deposit.depid).await.unwrap();
        assert_eq!(edited.deposit_status(), DepositStatus::Edited);
        assert_eq!(edited.draft["title"], "Test title");

        let mut meta = edited.draft.clone();
        meta["title"] = json!("Changed title");
        f.deposits.update(&f.owner, deposit.depid, &meta).await.unwrap();
        let second = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();

        assert_eq!(second.record.id, first.record.id);
        assert_eq!(second.record.json["title"], "Changed title");
        assert_eq!(second.record.json["doi"], first.record.json["doi"]);
        assert_eq!(second.record.record_bucket(), first.record.record_bucket());
        assert_eq!(second.record.json["_oai"]["id"], first.record.json["_oai"]["id"]);
        assert_eq!(SipEntity::find().all(f.services.db.read()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_discard_restores_record_files() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;
        let first = f.publisher.publish(&f.owner, deposit.depid).await.unwrap();

        f.deposits.edit(&f.owner, deposit.depid).await.unwrap();
        f.deposits.remove_file(&f.owner, deposit.depid, "test-1.txt").await.unwrap();
        f.deposits.add_file(&f.owner, deposit.depid, "other.txt", b"other").await.unwrap();

        let discarded = f.deposits.discard(&f.owner, deposit.depid).await.unwrap();
        assert_eq!(discarded.deposit_status(), DepositStatus::Published);
        let files = f.deposits.list_files(&discarded).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].key, "test-1.txt");

        let db = f.services.db.read();
        assert!(f.services.storage.get_bucket(db, discarded.bucket_id).await.unwrap().locked);
        assert_ne!(Some(discarded.bucket_id), first.record.record_bucket());
    }

    #[tokio::test]
    async fn test_published_deposition_cannot_be_deleted() {
        let f = fixture().await;
        let deposit = draft_with_file(&f, metadata()).await;
        f.publisher.publish(&f.owner, deposit.depid).await.unwrap();

        let err = f.deposits.delete(&f.owner, deposit.depid).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 403);
    }
}
