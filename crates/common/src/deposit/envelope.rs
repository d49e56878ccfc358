//! JSON envelope returned by the deposit API

use crate::config::SiteConfig;
use crate::db::models::{Deposit, DepositStatus};
use crate::storage::ObjectInfo;
use serde_json::{json, Map, Value};

/// Public identifier of a file inside its bucket
pub fn file_entry(site: &SiteConfig, file: &ObjectInfo) -> Value {
    let base = site.url.trim_end_matches('/');
    json!({
        "id": file.version_id.to_string(),
        "filename": file.key,
        "filesize": file.size,
        "checksum": file.checksum,
        "links": {
            "self": format!("{}/files/{}/{}", base, file.bucket_id, file.key),
        },
    })
}

/// Build the deposition envelope.
///
/// `latest_draft` is the deposition id of an open new-version draft.
pub fn envelope(site: &SiteConfig, deposit: &Deposit, files: &[ObjectInfo], latest_draft: Option<i32>) -> Value {
    let base = site.url.trim_end_matches('/');
    let this = format!("{}/deposit/{}", base, deposit.depid);

    let mut links = Map::new();
    links.insert("self".into(), json!(this));
    links.insert("bucket".into(), json!(format!("{}/files/{}", base, deposit.bucket_id)));
    links.insert("files".into(), json!(format!("{}/files", this)));
    links.insert("publish".into(), json!(format!("{}/actions/publish", this)));
    links.insert("edit".into(), json!(format!("{}/actions/edit", this)));
    links.insert("discard".into(), json!(format!("{}/actions/discard", this)));
    links.insert("newversion".into(), json!(format!("{}/actions/newversion", this)));
    if let Some(draft) = latest_draft {
        links.insert("latest_draft".into(), json!(format!("{}/deposit/{}", base, draft)));
    }

    let mut out = Map::new();
    out.insert("id".into(), json!(deposit.depid));
    out.insert("owner".into(), json!(deposit.owner_id));
    out.insert("metadata".into(), deposit.draft.clone());
    out.insert("files".into(), Value::Array(files.iter().map(|f| file_entry(site, f)).collect()));
    out.insert("state".into(), json!(deposit.status));
    out.insert("submitted".into(), json!(deposit.recid.is_some()));
    out.insert("created".into(), json!(deposit.created.to_rfc3339()));
    out.insert("modified".into(), json!(deposit.updated.to_rfc3339()));

    if let Some(conceptrecid) = deposit.conceptrecid {
        out.insert("conceptrecid".into(), json!(conceptrecid.to_string()));
    }

    let doi = deposit
        .draft
        .get("doi")
        .and_then(Value::as_str)
        .filter(|_| deposit.recid.is_some())
        .or_else(|| deposit.prereserved_doi());
    if let Some(doi) = doi {
        out.insert("doi".into(), json!(doi));
        out.insert("doi_url".into(), json!(format!("https://doi.org/{}", doi)));
    }

    if let Some(recid) = deposit.recid {
        let record_url = site.record_url(&recid.to_string());
        links.insert("record".into(), json!(record_url));
        out.insert("record_id".into(), json!(recid));
        out.insert("record_url".into(), json!(record_url));
    }
    if let Some(errors) = deposit.errors.as_ref().filter(|_| deposit.deposit_status() == DepositStatus::Draft) {
        out.insert("errors".into(), errors.clone());
    }

    out.insert("links".into(), Value::Object(links));
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn deposit(status: DepositStatus, recid: Option<i32>) -> Deposit {
        Deposit {
            id: Uuid::new_v4(),
            depid: 7,
            owner_id: 1,
            status: status.to_string(),
            draft: json!({"title": "T", "doi": "10.5281/zenodo.7"}),
            bucket_id: Uuid::nil(),
            recid,
            conceptrecid: None,
            errors: None,
            created: Utc::now().into(),
            updated: Utc::now().into(),
        }
    }

    #[test]
    fn test_draft_envelope() {
        let site = SiteConfig::default();
        let out = envelope(&site, &deposit(DepositStatus::Draft, None), &[], None);

        assert_eq!(out["id"], 7);
        assert_eq!(out["state"], "draft");
        assert_eq!(out["submitted"], false);
        assert_eq!(out["links"]["self"], "https://zenodo.org/deposit/7");
        assert_eq!(out["links"]["bucket"], format!("https://zenodo.org/files/{}", Uuid::nil()));
        assert!(out.get("doi").is_none());
        assert!(out["links"].get("record").is_none());
    }

    #[test]
    fn test_published_envelope() {
        let site = SiteConfig::default();
        let out = envelope(&site, &deposit(DepositStatus::Published, Some(7)), &[], Some(9));

        assert_eq!(out["state"], "published");
        assert_eq!(out["submitted"], true);
        assert_eq!(out["record_id"], 7);
        assert_eq!(out["record_url"], "https://zenodo.org/record/7");
        assert_eq!(out["doi_url"], "https://doi.org/10.5281/zenodo.7");
        assert_eq!(out["links"]["latest_draft"], "https://zenodo.org/deposit/9");
    }
}
