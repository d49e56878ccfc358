//! Post-processing of translated metadata into record metadata, and the
//! reverse clean-up used when a record is loaded back into a draft

use crate::config::SiteConfig;
use crate::db::models::{Grant, License};
use crate::deposit::firerole::Firerole;
use crate::deposit::Actor;
use crate::storage::ObjectInfo;
use crate::validators::is_blank;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

pub const LICENSE_SOURCE: &str = "opendefinition.org";

/// `url[].relation` of a migrated conference URL
pub const CONFERENCE_URL: &str = "conference";

/// Keys owned by the pipeline, never part of a draft
const SYSTEM_KEYS: &[&str] = &[
    "_oai",
    "_files",
    "_buckets",
    "_deposit",
    "_internal",
    "owner",
    "owners",
    "recid",
    "conceptrecid",
    "conceptdoi",
    "provisional_communities",
];

/// Inputs resolved from the knowledge base before post-processing
pub struct PostprocessContext<'a> {
    pub site: &'a SiteConfig,
    pub owner: &'a Actor,
    pub depid: i32,
    pub license: Option<&'a License>,
    pub grants: &'a HashMap<String, Grant>,
    /// Communities that need no curation request
    pub accepted: &'a HashSet<String>,
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

/// Submitter block stored with the SIP
pub fn owner_block(owner: &Actor, depid: i32) -> Value {
    json!({
        "email": owner.email,
        "username": owner.username.clone().unwrap_or_default(),
        "id": owner.user_id,
        "deposition_id": depid,
    })
}

/// Zero padded ordinal so that files sort back into upload order
pub fn file_comment(index: usize, count: usize) -> String {
    let width = count.to_string().len();
    format!("{:0width$}", index, width = width)
}

/// Restriction rule for the files of a record
pub fn file_firerole(metadata: &Value, owner_email: &str) -> Firerole {
    let access_right = metadata.get("access_right").and_then(Value::as_str).unwrap_or("closed");
    let embargo = metadata
        .get("embargo_date")
        .and_then(Value::as_str)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    Firerole::for_access(access_right, owner_email, embargo)
}

/// File list entries carrying restriction and ordering comment
pub fn file_entries(files: &[ObjectInfo], restriction: &Firerole) -> Vec<Value> {
    let restriction = restriction.to_string();
    files
        .iter()
        .enumerate()
        .map(|(i, f)| {
            json!({
                "bucket": f.bucket_id.to_string(),
                "key": f.key,
                "version_id": f.version_id.to_string(),
                "file_id": f.file_id.to_string(),
                "size": f.size,
                "checksum": f.checksum,
                "restriction": restriction,
                "comment": file_comment(i, files.len()),
            })
        })
        .collect()
}

/// Turn translated draft metadata into record metadata
pub fn postprocess(nested: Value, ctx: &PostprocessContext<'_>) -> Value {
    let Value::Object(mut meta) = nested else {
        return nested;
    };
    for key in SYSTEM_KEYS {
        meta.remove(*key);
    }
    meta.remove("prereserve_doi");

    // Communities
    let requested: BTreeSet<String> = strings(meta.get("communities")).into_iter().collect();
    let (accepted, mut provisional): (BTreeSet<String>, BTreeSet<String>) =
        requested.into_iter().partition(|c| ctx.accepted.contains(c));
    let has_grants = meta.get("grants").map(|g| !is_blank(g)).unwrap_or(false);
    provisional.insert(ctx.site.curation_community.clone());
    if has_grants {
        provisional.insert(ctx.site.ec_funded_community.clone());
    }
    if accepted.is_empty() {
        meta.remove("communities");
    } else {
        meta.insert("communities".into(), json!(accepted));
    }
    meta.insert("provisional_communities".into(), json!(provisional));

    // License
    let open = matches!(
        meta.get("access_right").and_then(Value::as_str),
        Some("open") | Some("embargoed")
    );
    match (open, ctx.license) {
        (true, Some(license)) => {
            meta.insert(
                "license".into(),
                json!({
                    "identifier": license.id,
                    "license": license.title,
                    "source": LICENSE_SOURCE,
                    "url": license.url.clone().unwrap_or_default(),
                }),
            );
        }
        (true, None) => {}
        (false, _) => {
            meta.remove("license");
        }
    }

    // Grants
    if let Some(Value::Array(grants)) = meta.remove("grants") {
        let grants: Vec<Value> = grants
            .iter()
            .filter_map(Value::as_str)
            .map(|id| match ctx.grants.get(id) {
                Some(grant) => json!({"title": grant.display_title(), "identifier": id}),
                None => json!({"identifier": id}),
            })
            .collect();
        if !grants.is_empty() {
            meta.insert("grants".into(), Value::Array(grants));
        }
    }

    // Conference URL
    let conference_url = meta
        .get_mut("meetings")
        .and_then(Value::as_object_mut)
        .and_then(|m| m.remove("url"));
    if let Some(Value::String(url)) = conference_url {
        let urls = meta.entry("url").or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(urls) = urls {
            urls.push(json!({"url": url, "relation": CONFERENCE_URL}));
        }
    }
    if meta.get("meetings").map(is_blank).unwrap_or(false) {
        meta.remove("meetings");
    }

    filter_empty(&mut meta);
    meta.insert("owners".into(), json!([ctx.owner.user_id]));
    Value::Object(meta)
}

fn filter_empty(meta: &mut Map<String, Value>) {
    fn retain(list: Option<&mut Value>, keep: impl Fn(&Value) -> bool) {
        if let Some(Value::Array(items)) = list {
            items.retain(|item| keep(item));
        }
    }
    let named = |p: &Value| p.get("name").map(|n| !is_blank(n)).unwrap_or(false);

    retain(meta.get_mut("creators"), named);
    retain(meta.get_mut("contributors"), named);
    retain(meta.get_mut("keywords"), |k| !is_blank(k));
    retain(
        meta.get_mut("thesis").and_then(|t| t.get_mut("supervisors")),
        named,
    );
    retain(meta.get_mut("related_identifiers"), |r| {
        r.get("identifier").map(|i| !is_blank(i)).unwrap_or(false)
    });

    let blank: Vec<String> = meta
        .iter()
        .filter(|(_, v)| matches!(v, Value::Array(a) if a.is_empty()))
        .map(|(k, _)| k.clone())
        .collect();
    for key in blank {
        meta.remove(&key);
    }
}

/// Reduce record metadata to what the deposit form edits (nested shape)
pub fn strip_for_draft(record: &Value, site: &SiteConfig) -> Value {
    let Some(source) = record.as_object() else {
        return record.clone();
    };
    let mut meta = source.clone();

    let mut communities: BTreeSet<String> = strings(meta.get("communities")).into_iter().collect();
    communities.extend(strings(meta.get("provisional_communities")));
    communities.remove(&site.curation_community);
    communities.remove(&site.ec_funded_community);

    for key in SYSTEM_KEYS {
        meta.remove(*key);
    }
    if communities.is_empty() {
        meta.remove("communities");
    } else {
        meta.insert("communities".into(), json!(communities));
    }

    if let Some(Value::Array(urls)) = meta.remove("url") {
        let (conference, rest): (Vec<Value>, Vec<Value>) = urls
            .into_iter()
            .partition(|u| u.get("relation").and_then(Value::as_str) == Some(CONFERENCE_URL));
        if let Some(url) = conference.first().and_then(|u| u.get("url")).cloned() {
            let meetings = meta.entry("meetings").or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(meetings) = meetings {
                meetings.insert("url".into(), url);
            }
        }
        if !rest.is_empty() {
            meta.insert("url".into(), Value::Array(rest));
        }
    }

    Value::Object(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::{legacy_to_nested, nested_to_legacy};

    fn actor() -> Actor {
        Actor::user(3, "owner@example.org")
    }

    fn grant() -> Grant {
        Grant {
            id: "283595".into(),
            acronym: Some("OpenAIREplus".into()),
            title: "2nd-Generation Open Access Infrastructure".into(),
            funder: None,
        }
    }

    fn license() -> License {
        License {
            id: "cc-by".into(),
            title: "Creative Commons Attribution 4.0".into(),
            url: Some("https://creativecommons.org/licenses/by/4.0/".into()),
            is_open: true,
        }
    }

    #[test]
    fn test_file_comment() {
        assert_eq!(file_comment(0, 1), "0");
        assert_eq!(file_comment(3, 12), "03");
        assert_eq!(file_comment(7, 100), "007");
    }

    #[test]
    fn test_postprocess() {
        let site = SiteConfig::default();
        let owner = actor();
        let grants = HashMap::from([("283595".to_string(), grant())]);
        let accepted = HashSet::from(["mine".to_string()]);
        let license = license();
        let ctx = PostprocessContext {
            site: &site,
            owner: &owner,
            depid: 5,
            license: Some(&license),
            grants: &grants,
            accepted: &accepted,
        };

        let legacy = json!({
            "title": "T",
            "access_right": "open",
            "license": "cc-by",
            "communities": [{"identifier": "mine"}, {"identifier": "theirs"}],
            "grants": [{"id": "283595"}],
            "conference_title": "Conf",
            "conference_url": "https://conf.example.org",
            "keywords": ["a", ""],
            "creators": [{"name": "Doe, John"}, {"name": ""}]
        });
        let out = postprocess(legacy_to_nested(&legacy), &ctx);

        assert_eq!(out["communities"], json!(["mine"]));
        assert_eq!(out["provisional_communities"], json!(["ecfunded", "theirs", "zenodo"]));
        assert_eq!(out["license"]["license"], "Creative Commons Attribution 4.0");
        assert_eq!(out["license"]["source"], LICENSE_SOURCE);
        assert_eq!(
            out["grants"],
            json!([{"title": "OpenAIREplus - 2nd-Generation Open Access Infrastructure (283595)", "identifier": "283595"}])
        );
        assert_eq!(out["url"], json!([{"url": "https://conf.example.org", "relation": "conference"}]));
        assert!(out["meetings"].get("url").is_none());
        assert_eq!(out["keywords"], json!(["a"]));
        assert_eq!(out["creators"].as_array().unwrap().len(), 1);
        assert_eq!(out["owners"], json!([3]));
    }

    #[test]
    fn test_closed_access_drops_license() {
        let site = SiteConfig::default();
        let owner = actor();
        let grants = HashMap::new();
        let accepted = HashSet::new();
        let license = license();
        let ctx = PostprocessContext {
            site: &site,
            owner: &owner,
            depid: 5,
            license: Some(&license),
            grants: &grants,
            accepted: &accepted,
        };

        let out = postprocess(json!({"access_right": "closed", "license": {"identifier": "cc-by"}}), &ctx);
        assert!(out.get("license").is_none());
        assert_eq!(out["provisional_communities"], json!(["zenodo"]));
    }

    #[test]
    fn test_strip_for_draft_restores_form_fields() {
        let site = SiteConfig::default();
        let record = json!({
            "recid": 5,
            "doi": "10.5281/zenodo.5",
            "title": "T",
            "communities": ["mine"],
            "provisional_communities": ["theirs", "zenodo"],
            "license": {"identifier": "cc-by", "license": "CC BY", "source": LICENSE_SOURCE, "url": ""},
            "url": [{"url": "https://conf.example.org", "relation": "conference"}],
            "meetings": {"title": "Conf"},
            "_oai": {"id": "oai:zenodo.org:5"},
            "_files": [],
            "owners": [3]
        });

        let legacy = nested_to_legacy(&strip_for_draft(&record, &site));
        assert_eq!(
            legacy,
            json!({
                "doi": "10.5281/zenodo.5",
                "title": "T",
                "communities": [{"identifier": "mine"}, {"identifier": "theirs"}],
                "license": "cc-by",
                "conference_title": "Conf",
                "conference_url": "https://conf.example.org"
            })
        );
    }

    #[test]
    fn test_file_entries() {
        let files = vec![ObjectInfo {
            bucket_id: uuid::Uuid::nil(),
            version_id: uuid::Uuid::nil(),
            file_id: uuid::Uuid::nil(),
            key: "test-1.txt".into(),
            size: 10,
            checksum: "sha256:ab".into(),
            position: 0,
        }];
        let role = file_firerole(&json!({"access_right": "embargoed", "embargo_date": "2099-01-01"}), "o@x.org");
        let entries = file_entries(&files, &role);
        assert_eq!(
            entries[0]["restriction"],
            "firerole: allow email \"o@x.org\"\ndeny until \"2099-01-01\"\nallow any"
        );
        assert_eq!(entries[0]["comment"], "0");
    }
}
