//! Maps tasks onto the domain services

use super::{Task, TaskHandler};
use crate::auditor::files::verify_file;
use crate::db::models::{Pid, PidStatus, UserEntity};
use crate::errors::{AppError, Result};
use crate::notify::Email;
use crate::oaiset;
use crate::preservation;
use crate::records;
use crate::serializers::datacite_v3;
use crate::services::Services;
use crate::versioning;
use async_trait::async_trait;
use sea_orm::EntityTrait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Executes tasks against a [`Services`] bundle
pub struct TaskExecutor {
    services: Services,
}

impl TaskExecutor {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn index(&self, record_id: Uuid) -> Result<()> {
        match records::find(self.services.db.read(), record_id).await? {
            Some(record) => self.services.indexer.index(&record).await,
            None => self.services.indexer.delete(record_id).await,
        }
    }

    async fn notify_communities(&self, record_id: Uuid) -> Result<()> {
        let db = self.services.db.read();
        let record = records::get(db, record_id).await?;
        let recid = record.recid().unwrap_or_default();
        let title = record.json.get("title").and_then(Value::as_str).unwrap_or_default();

        let requested: Vec<String> = record
            .json
            .get("provisional_communities")
            .and_then(Value::as_array)
            .map(|c| c.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        for community_id in requested {
            let Some(community) = self.services.kb.community(db, &community_id).await? else {
                warn!(community = %community_id, "Unknown community, no curation request sent");
                continue;
            };
            let Some(owner) = UserEntity::find_by_id(community.owner_id).one(db).await? else {
                warn!(community = %community_id, owner_id = community.owner_id, "Community owner not found");
                continue;
            };

            let email = Email::new(
                owner.email,
                format!("[Zenodo] New upload requested for community \"{}\"", community.title),
                format!(
                    "The upload \"{}\" was submitted to your community \"{}\".\n{}\n",
                    title,
                    community.title,
                    self.services.config.site.record_url(&recid)
                ),
            );
            self.services.mailer.send(email).await?;
            debug!(community = %community_id, "Curation request sent");
        }
        Ok(())
    }

    async fn sync_oai(&self, record_id: Uuid) -> Result<()> {
        let db = self.services.db.write();
        let patterns = oaiset::pattern_sets(db).await?;
        let record = records::get(db, record_id).await?;
        let (record, _) =
            oaiset::sync_record(db, &self.services.pids, &self.services.config.site, &patterns, record).await?;
        self.services.indexer.index(&record).await
    }

    async fn set_membership(&self, record_id: Uuid, spec: &str, member: bool) -> Result<()> {
        if oaiset::set_membership(self.services.db.write(), record_id, spec, member).await? {
            self.index(record_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for TaskExecutor {
    #[instrument(skip(self), fields(task = task.name()))]
    async fn handle(&self, task: &Task) -> Result<()> {
        match task {
            Task::IndexRecord { record_id } => self.index(*record_id).await,
            Task::RegisterDoi { recid } => register_record_doi(&self.services, recid).await,
            Task::NotifyCommunities { record_id } => self.notify_communities(*record_id).await,
            Task::PreservationScore { record_id } => {
                if let Some(record) = preservation::update_record_score(self.services.db.write(), *record_id).await? {
                    self.services.indexer.index(&record).await?;
                }
                Ok(())
            }
            Task::SyncRecordOai { record_id } => self.sync_oai(*record_id).await,
            Task::OaiSetAdd { spec, record_id } => self.set_membership(*record_id, spec, true).await,
            Task::OaiSetRemove { spec, record_id } => self.set_membership(*record_id, spec, false).await,
            Task::VerifyFile { file_id } => {
                verify_file(self.services.db.write(), &self.services.storage, *file_id).await?;
                Ok(())
            }
        }
    }
}

/// Push one DOI to its registrar according to its current status
async fn push_doi(services: &Services, pid: &Pid, url: &str, doc: &str) -> Result<()> {
    let db = services.db.write();
    let done = match pid.pid_status() {
        PidStatus::New | PidStatus::Reserved => services.pids.register(db, pid, url, Some(doc)).await?,
        PidStatus::Registered => services.pids.update(db, pid, Some(url), Some(doc), false).await?,
        PidStatus::Deleted => services.pids.update(db, pid, Some(url), Some(doc), true).await?,
    };

    if !done {
        return Err(AppError::Provider {
            provider: pid.pid_provider.clone().unwrap_or_default(),
            message: format!("Registrar refused {}", pid.label()),
        });
    }
    info!(pid = %pid.label(), url = %url, "DOI pushed to registrar");
    Ok(())
}

/// Register or update the DOIs of a record with the registrar.
///
/// The concept DOI follows the metadata of the last published version.
#[instrument(skip(services))]
pub async fn register_record_doi(services: &Services, recid: &str) -> Result<()> {
    let db = services.db.write();
    let site = &services.config.site;
    let record = records::get_by_recid(db, &services.pids, recid).await?;

    let Some(doi) = record.json.get("doi").and_then(Value::as_str) else {
        debug!("Record has no DOI");
        return Ok(());
    };
    if !site.is_local_doi(doi) {
        debug!(doi = %doi, "DOI is administrated elsewhere");
        return Ok(());
    }

    let pid = services.pids.get_required(db, "doi", doi).await?;
    let doc = datacite_v3(&record.json, site);
    push_doi(services, &pid, &site.record_url(recid), &doc).await?;

    let concept = (
        record.json.get("conceptdoi").and_then(Value::as_str),
        record.json.get("conceptrecid").and_then(Value::as_str),
    );
    let (Some(conceptdoi), Some(conceptrecid)) = concept else {
        return Ok(());
    };

    let recid_pid = services.pids.get_required(db, "recid", recid).await?;
    let is_last = versioning::summary(db, &recid_pid)
        .await?
        .map(|s| s.is_last)
        .unwrap_or(false);
    if !is_last {
        return Ok(());
    }

    let concept_pid = services.pids.get_required(db, "doi", conceptdoi).await?;
    let mut concept_json = record.json.clone();
    if let Some(obj) = concept_json.as_object_mut() {
        obj.insert("doi".into(), Value::String(conceptdoi.to_string()));
        obj.remove("conceptdoi");
    }
    let concept_doc = datacite_v3(&concept_json, site);
    push_doi(services, &concept_pid, &site.record_url(conceptrecid), &concept_doc).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CommunityActiveModel, UserActiveModel};
    use crate::indexer::MemoryIndexer;
    use crate::notify::MemoryMailer;
    use crate::pidstore::{NewPid, PidStore};
    use crate::providers::{PidProvider, ProviderRegistry};
    use crate::records::RECORD_OBJECT_TYPE;
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, Set};
    use serde_json::json;
    use std::sync::Arc;

    async fn published(services: &Services, recid: &str, json: Value) -> Uuid {
        let db = services.db.write();
        let id = Uuid::new_v4();
        records::create(db, id, json).await.unwrap();
        services
            .pids
            .create(
                db,
                NewPid::new("recid", recid)
                    .status(PidStatus::Registered)
                    .object(RECORD_OBJECT_TYPE, id),
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_register_record_doi() {
        let services = Services::in_memory().await.unwrap();
        let db = services.db.write();
        published(&services, "1", json!({"recid": 1, "doi": "10.5281/zenodo.1", "title": "T"})).await;
        services
            .pids
            .create(db, NewPid::new("doi", "10.5281/zenodo.1").status(PidStatus::Reserved))
            .await
            .unwrap();

        register_record_doi(&services, "1").await.unwrap();
        let pid = services.pids.get_required(db, "doi", "10.5281/zenodo.1").await.unwrap();
        assert!(pid.is_registered());

        // A second run updates the registered DOI
        register_record_doi(&services, "1").await.unwrap();
        let logs = services.pids.logs(db, &pid).await.unwrap();
        assert_eq!(logs.last().unwrap().action, "UPDATE");
    }

    #[tokio::test]
    async fn test_register_external_doi_is_skipped() {
        let services = Services::in_memory().await.unwrap();
        published(&services, "2", json!({"recid": 2, "doi": "10.1234/other"})).await;
        register_record_doi(&services, "2").await.unwrap();
    }

    struct RefusingProvider;

    #[async_trait]
    impl PidProvider for RefusingProvider {
        fn name(&self) -> &'static str {
            "refusing"
        }
        fn accepts(&self, pid_type: &str, _pid_value: &str) -> bool {
            pid_type == "doi"
        }
        async fn reserve(&self, _pid: &Pid, _doc: Option<&str>) -> Result<bool> {
            Ok(false)
        }
        async fn register(&self, _pid: &Pid, _url: &str, _doc: Option<&str>) -> Result<bool> {
            Ok(false)
        }
        async fn update(&self, _pid: &Pid, _url: Option<&str>, _doc: Option<&str>) -> Result<bool> {
            Ok(false)
        }
        async fn delete(&self, _pid: &Pid) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_refused_registration_is_retryable() {
        let registry = ProviderRegistry::local().with(Arc::new(RefusingProvider));
        let services = Services::in_memory()
            .await
            .unwrap()
            .with_pids(PidStore::new(registry));
        let db = services.db.write();

        published(&services, "3", json!({"recid": 3, "doi": "10.5281/zenodo.3"})).await;
        services
            .pids
            .create(
                db,
                NewPid::new("doi", "10.5281/zenodo.3")
                    .status(PidStatus::Reserved)
                    .provider("refusing"),
            )
            .await
            .unwrap();

        let err = register_record_doi(&services, "3").await.unwrap_err();
        assert!(err.is_retryable());
        let pid = services.pids.get_required(db, "doi", "10.5281/zenodo.3").await.unwrap();
        assert!(pid.is_reserved());
    }

    #[tokio::test]
    async fn test_executor_tasks() {
        let indexer = Arc::new(MemoryIndexer::new());
        let mailer = Arc::new(MemoryMailer::new());
        let services = Services::in_memory()
            .await
            .unwrap()
            .with_indexer(indexer.clone())
            .with_mailer(mailer.clone());
        let db = services.db.write();

        UserActiveModel {
            id: Set(1),
            email: Set("curator@example.org".into()),
            username: Set(None),
        }
        .insert(db)
        .await
        .unwrap();
        CommunityActiveModel {
            id: Set("c1".into()),
            title: Set("Community One".into()),
            owner_id: Set(1),
            created: Set(Utc::now().into()),
            updated: Set(Utc::now().into()),
        }
        .insert(db)
        .await
        .unwrap();

        let record_id = published(
            &services,
            "4",
            json!({
                "recid": 4,
                "title": "Upload",
                "communities": ["c1"],
                "provisional_communities": ["c1", "unknown"],
                "_files": [{"key": "data.csv"}]
            }),
        )
        .await;

        let executor = TaskExecutor::new(services.clone());
        executor.handle(&Task::SyncRecordOai { record_id }).await.unwrap();
        let record = records::get(db, record_id).await.unwrap();
        assert_eq!(record.json["_oai"]["id"], "oai:zenodo.org:4");
        assert_eq!(record.json["_oai"]["sets"], json!(["user-c1"]));
        assert!(indexer.get(record_id).await.is_some());

        executor.handle(&Task::PreservationScore { record_id }).await.unwrap();
        let record = records::get(db, record_id).await.unwrap();
        assert_eq!(record.json["_internal"]["preservation_score"], 100);

        executor
            .handle(&Task::OaiSetAdd {
                spec: "extra".into(),
                record_id,
            })
            .await
            .unwrap();
        let record = records::get(db, record_id).await.unwrap();
        assert_eq!(record.json["_oai"]["sets"], json!(["extra", "user-c1"]));

        executor.handle(&Task::NotifyCommunities { record_id }).await.unwrap();
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["curator@example.org".to_string()]);
        assert!(sent[0].body.contains("https://zenodo.org/record/4"));
    }
}
