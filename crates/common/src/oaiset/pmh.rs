//! OAI-PMH 2.0 protocol surface
//!
//! Verbs: Identify, ListSets, ListMetadataFormats, ListIdentifiers,
//! ListRecords and GetRecord. Protocol errors are reported inside the XML
//! response; only storage failures surface as `Err`.

use super::{datestamp, OAI_PID_TYPE};
use crate::config::SiteConfig;
use crate::db::models::*;
use crate::errors::Result;
use crate::pidstore::PidStore;
use crate::records;
use crate::serializers::{MetadataFormat, XmlBuilder, METADATA_PREFIXES};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ConnectionTrait, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Records per ListIdentifiers/ListRecords page
pub const PAGE_SIZE: usize = 100;

const EARLIEST_DATESTAMP: &str = "2013-01-01T00:00:00Z";
const SCAN_PAGE: u64 = 500;

/// Query parameters of an OAI-PMH request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OaiRequest {
    pub verb: Option<String>,
    pub identifier: Option<String>,
    pub metadata_prefix: Option<String>,
    pub set: Option<String>,
    pub from: Option<String>,
    pub until: Option<String>,
    pub resumption_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ListState {
    offset: usize,
    prefix: String,
    set: Option<String>,
    from: Option<String>,
    until: Option<String>,
}

impl ListState {
    fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OaiError {
    BadArgument(String),
    BadResumptionToken,
    BadVerb,
    CannotDisseminateFormat(String),
    IdDoesNotExist(String),
    NoRecordsMatch,
    NoSetHierarchy,
}

impl OaiError {
    fn code(&self) -> &'static str {
        match self {
            OaiError::BadArgument(_) => "badArgument",
            OaiError::BadResumptionToken => "badResumptionToken",
            OaiError::BadVerb => "badVerb",
            OaiError::CannotDisseminateFormat(_) => "cannotDisseminateFormat",
            OaiError::IdDoesNotExist(_) => "idDoesNotExist",
            OaiError::NoRecordsMatch => "noRecordsMatch",
            OaiError::NoSetHierarchy => "noSetHierarchy",
        }
    }

    fn message(&self) -> String {
        match self {
            OaiError::BadArgument(reason) => reason.clone(),
            OaiError::BadResumptionToken => "The value of the resumptionToken argument is invalid or expired.".into(),
            OaiError::BadVerb => "Illegal OAI verb.".into(),
            OaiError::CannotDisseminateFormat(prefix) => {
                format!("The metadata format '{}' is not supported by this repository.", prefix)
            }
            OaiError::IdDoesNotExist(id) => format!("No matching identifier: {}", id),
            OaiError::NoRecordsMatch => "No records match the request.".into(),
            OaiError::NoSetHierarchy => "This repository does not support sets.".into(),
        }
    }
}

/// Either a protocol error or a storage failure
enum Failure {
    Oai(OaiError),
    Store(crate::errors::AppError),
}

impl From<OaiError> for Failure {
    fn from(e: OaiError) -> Self {
        Failure::Oai(e)
    }
}

impl From<crate::errors::AppError> for Failure {
    fn from(e: crate::errors::AppError) -> Self {
        Failure::Store(e)
    }
}

impl From<sea_orm::DbErr> for Failure {
    fn from(e: sea_orm::DbErr) -> Self {
        Failure::Store(e.into())
    }
}

/// Serve one OAI-PMH request and return the XML response
pub async fn handle<C: ConnectionTrait>(
    db: &C,
    pids: &PidStore,
    site: &SiteConfig,
    request: &OaiRequest,
    now: DateTime<Utc>,
) -> Result<String> {
    let verb = request.verb.as_deref().unwrap_or_default();
    debug!(verb, "OAI-PMH request");

    let mut body = XmlBuilder::new();
    let outcome = match verb {
        "Identify" => identify(site, &mut body),
        "ListSets" => list_sets(db, &mut body).await,
        "ListMetadataFormats" => list_metadata_formats(db, pids, request, &mut body).await,
        "GetRecord" => get_record(db, pids, site, request, &mut body).await,
        "ListIdentifiers" => list(db, site, request, false, &mut body).await,
        "ListRecords" => list(db, site, request, true, &mut body).await,
        _ => Err(OaiError::BadVerb.into()),
    };

    let body = match outcome {
        Ok(()) => body.finish(),
        Err(Failure::Store(e)) => return Err(e),
        Err(Failure::Oai(e)) => {
            let mut error = XmlBuilder::new();
            error.leaf("error", &[("code", e.code())], &e.message());
            error.finish()
        }
    };

    let mut xml = XmlBuilder::new().declaration();
    xml.open(
        "OAI-PMH",
        &[
            ("xmlns", "http://www.openarchives.org/OAI/2.0/"),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            (
                "xsi:schemaLocation",
                "http://www.openarchives.org/OAI/2.0/ http://www.openarchives.org/OAI/2.0/OAI-PMH.xsd",
            ),
        ],
    )
    .leaf("responseDate", &[], &datestamp(now));

    let mut attrs: Vec<(&str, &str)> = Vec::new();
    if !verb.is_empty() {
        attrs.push(("verb", verb));
    }
    for (name, value) in [
        ("identifier", &request.identifier),
        ("metadataPrefix", &request.metadata_prefix),
        ("set", &request.set),
        ("from", &request.from),
        ("until", &request.until),
        ("resumptionToken", &request.resumption_token),
    ] {
        if let Some(value) = value {
            attrs.push((name, value.as_str()));
        }
    }
    xml.leaf("request", &attrs, &base_url(site))
        .raw(&body)
        .close("OAI-PMH");
    Ok(xml.finish())
}

fn base_url(site: &SiteConfig) -> String {
    format!("{}/oai2d", site.url.trim_end_matches('/'))
}

// ============================================================================
// Verbs
// ============================================================================

fn identify(site: &SiteConfig, xml: &mut XmlBuilder) -> std::result::Result<(), Failure> {
    xml.open("Identify", &[])
        .leaf("repositoryName", &[], crate::serializers::PUBLISHER)
        .leaf("baseURL", &[], &base_url(site))
        .leaf("protocolVersion", &[], "2.0")
        .leaf("adminEmail", &[], &site.admin_email)
        .leaf("earliestDatestamp", &[], EARLIEST_DATESTAMP)
        .leaf("deletedRecord", &[], "no")
        .leaf("granularity", &[], "YYYY-MM-DDThh:mm:ssZ")
        .close("Identify");
    Ok(())
}

async fn list_sets<C: ConnectionTrait>(db: &C, xml: &mut XmlBuilder) -> std::result::Result<(), Failure> {
    let sets = OaiSetEntity::find()
        .order_by_asc(OaiSetColumn::Spec)
        .all(db)
        .await?;
    if sets.is_empty() {
        return Err(OaiError::NoSetHierarchy.into());
    }

    xml.open("ListSets", &[]);
    for set in sets {
        xml.open("set", &[]).leaf("setSpec", &[], &set.spec);
        xml.leaf("setName", &[], set.name.as_deref().unwrap_or(&set.spec));
        if let Some(description) = &set.description {
            xml.open("setDescription", &[])
                .open(
                    "oai_dc:dc",
                    &[
                        ("xmlns:oai_dc", "http://www.openarchives.org/OAI/2.0/oai_dc/"),
                        ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
                    ],
                )
                .leaf("dc:description", &[], description)
                .close("oai_dc:dc")
                .close("setDescription");
        }
        xml.close("set");
    }
    xml.close("ListSets");
    Ok(())
}

async fn list_metadata_formats<C: ConnectionTrait>(
    db: &C,
    pids: &PidStore,
    request: &OaiRequest,
    xml: &mut XmlBuilder,
) -> std::result::Result<(), Failure> {
    if let Some(identifier) = &request.identifier {
        resolve(db, pids, identifier).await?;
    }

    xml.open("ListMetadataFormats", &[]);
    for (prefix, format) in METADATA_PREFIXES {
        xml.open("metadataFormat", &[])
            .leaf("metadataPrefix", &[], prefix)
            .leaf("schema", &[], format.schema())
            .leaf("metadataNamespace", &[], format.namespace())
            .close("metadataFormat");
    }
    xml.close("ListMetadataFormats");
    Ok(())
}

async fn get_record<C: ConnectionTrait>(
    db: &C,
    pids: &PidStore,
    site: &SiteConfig,
    request: &OaiRequest,
    xml: &mut XmlBuilder,
) -> std::result::Result<(), Failure> {
    let (Some(identifier), Some(prefix)) = (&request.identifier, &request.metadata_prefix) else {
        return Err(OaiError::BadArgument("GetRecord requires identifier and metadataPrefix.".into()).into());
    };
    let format = metadata_format(prefix)?;
    let record = resolve(db, pids, identifier).await?;

    xml.open("GetRecord", &[]);
    write_record(xml, &record.json, Some((format, site)));
    xml.close("GetRecord");
    Ok(())
}

async fn list<C: ConnectionTrait>(
    db: &C,
    site: &SiteConfig,
    request: &OaiRequest,
    with_metadata: bool,
    xml: &mut XmlBuilder,
) -> std::result::Result<(), Failure> {
    let state = match &request.resumption_token {
        Some(token) => {
            let exclusive = request.metadata_prefix.is_some()
                || request.set.is_some()
                || request.from.is_some()
                || request.until.is_some();
            if exclusive {
                return Err(OaiError::BadArgument("resumptionToken is an exclusive argument.".into()).into());
            }
            ListState::decode(token).ok_or(OaiError::BadResumptionToken)?
        }
        None => ListState {
            offset: 0,
            prefix: request
                .metadata_prefix
                .clone()
                .ok_or_else(|| OaiError::BadArgument("metadataPrefix is required.".into()))?,
            set: request.set.clone(),
            from: request.from.as_deref().map(|d| parse_bound(d, false)).transpose()?,
            until: request.until.as_deref().map(|d| parse_bound(d, true)).transpose()?,
        },
    };

    let format = metadata_format(&state.prefix)?;
    if let (Some(from), Some(until)) = (&state.from, &state.until) {
        if from > until {
            return Err(OaiError::BadArgument("from must not be later than until.".into()).into());
        }
    }

    let matching = matching_records(db, &state).await?;
    if matching.is_empty() || state.offset >= matching.len() {
        return Err(OaiError::NoRecordsMatch.into());
    }

    let verb = if with_metadata { "ListRecords" } else { "ListIdentifiers" };
    let end = (state.offset + PAGE_SIZE).min(matching.len());

    xml.open(verb, &[]);
    for record in &matching[state.offset..end] {
        if with_metadata {
            write_record(xml, &record.json, Some((format, site)));
        } else {
            write_header(xml, &record.json);
        }
    }

    let size = matching.len().to_string();
    let cursor = state.offset.to_string();
    if end < matching.len() {
        let next = ListState {
            offset: end,
            ..state.clone()
        };
        xml.leaf(
            "resumptionToken",
            &[("completeListSize", &size), ("cursor", &cursor)],
            &next.encode(),
        );
    } else if state.offset > 0 {
        xml.leaf("resumptionToken", &[("completeListSize", &size), ("cursor", &cursor)], "");
    }
    xml.close(verb);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn metadata_format(prefix: &str) -> std::result::Result<MetadataFormat, OaiError> {
    MetadataFormat::from_prefix(prefix).ok_or_else(|| OaiError::CannotDisseminateFormat(prefix.to_string()))
}

/// Normalise a `from`/`until` argument to a full datestamp
fn parse_bound(value: &str, upper: bool) -> std::result::Result<String, OaiError> {
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        let time = if upper { "23:59:59" } else { "00:00:00" };
        return Ok(format!("{}T{}Z", value, time));
    }
    if DateTime::parse_from_rfc3339(value).is_ok() && value.ends_with('Z') && value.len() == 20 {
        return Ok(value.to_string());
    }
    Err(OaiError::BadArgument(format!("Invalid date: {}", value)))
}

async fn resolve<C: ConnectionTrait>(db: &C, pids: &PidStore, identifier: &str) -> std::result::Result<Record, Failure> {
    let missing = || OaiError::IdDoesNotExist(identifier.to_string());

    let pid = pids
        .get(db, OAI_PID_TYPE, identifier)
        .await?
        .filter(|p| p.is_registered())
        .ok_or_else(missing)?;
    let record_id = pid.object_uuid.ok_or_else(missing)?;
    Ok(records::find(db, record_id).await?.ok_or_else(missing)?)
}

async fn matching_records<C: ConnectionTrait>(db: &C, state: &ListState) -> Result<Vec<Record>> {
    let mut matching = Vec::new();
    let mut offset = 0;

    loop {
        let page = records::ids(db, offset, SCAN_PAGE).await?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as u64;

        for id in page {
            let record = records::get(db, id).await?;
            if is_harvestable(&record.json, state) {
                matching.push(record);
            }
        }
    }
    Ok(matching)
}

fn is_harvestable(record: &Value, state: &ListState) -> bool {
    let Some(updated) = record.pointer("/_oai/updated").and_then(Value::as_str) else {
        return false;
    };
    if record.pointer("/_oai/id").and_then(Value::as_str).is_none() {
        return false;
    }
    if let Some(set) = &state.set {
        let member = record
            .pointer("/_oai/sets")
            .and_then(Value::as_array)
            .is_some_and(|sets| sets.iter().any(|s| s.as_str() == Some(set)));
        if !member {
            return false;
        }
    }
    let after_from = state.from.as_deref().map_or(true, |from| updated >= from);
    let before_until = state.until.as_deref().map_or(true, |until| updated <= until);
    after_from && before_until
}

fn write_header(xml: &mut XmlBuilder, record: &Value) {
    let id = record.pointer("/_oai/id").and_then(Value::as_str).unwrap_or_default();
    let updated = record.pointer("/_oai/updated").and_then(Value::as_str).unwrap_or_default();

    xml.open("header", &[])
        .leaf("identifier", &[], id)
        .leaf("datestamp", &[], updated);
    for spec in record
        .pointer("/_oai/sets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        xml.leaf("setSpec", &[], spec);
    }
    xml.close("header");
}

fn write_record(xml: &mut XmlBuilder, record: &Value, metadata: Option<(MetadataFormat, &SiteConfig)>) {
    xml.open("record", &[]);
    write_header(xml, record);
    if let Some((format, site)) = metadata {
        xml.open("metadata", &[])
            .raw(&format.serialize(record, site))
            .close("metadata");
    }
    xml.close("record");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::oaiset::{create_set, ensure_oai_pid};
    use crate::providers::ProviderRegistry;
    use serde_json::json;
    use uuid::Uuid;

    fn request(verb: &str) -> OaiRequest {
        OaiRequest {
            verb: Some(verb.to_string()),
            ..Default::default()
        }
    }

    async fn seed(db: &sea_orm::DatabaseConnection, pids: &PidStore, recid: i32, sets: &[&str], updated: &str) {
        let oai_id = format!("oai:zenodo.org:{}", recid);
        let record = records::create(
            db,
            Uuid::new_v4(),
            json!({
                "recid": recid,
                "title": format!("Record {}", recid),
                "_oai": {"id": oai_id, "sets": sets, "updated": updated}
            }),
        )
        .await
        .unwrap();
        ensure_oai_pid(db, pids, &oai_id, record.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_identify_and_bad_verb() {
        let pool = DbPool::in_memory().await.unwrap();
        let pids = PidStore::new(ProviderRegistry::local());
        let site = SiteConfig::default();

        let xml = handle(pool.read(), &pids, &site, &request("Identify"), Utc::now())
            .await
            .unwrap();
        assert!(xml.contains("<baseURL>https://zenodo.org/oai2d</baseURL>"));
        assert!(xml.contains("<deletedRecord>no</deletedRecord>"));

        let xml = handle(pool.read(), &pids, &site, &request("Nope"), Utc::now())
            .await
            .unwrap();
        assert!(xml.contains(r#"<error code="badVerb">"#));
    }

    #[tokio::test]
    async fn test_list_sets_and_formats() {
        let pool = DbPool::in_memory().await.unwrap();
        let pids = PidStore::new(ProviderRegistry::local());
        let site = SiteConfig::default();

        let xml = handle(pool.read(), &pids, &site, &request("ListSets"), Utc::now())
            .await
            .unwrap();
        assert!(xml.contains(r#"code="noSetHierarchy""#));

        create_set(pool.write(), "user-c1", Some("Community 1"), None).await.unwrap();
        let xml = handle(pool.read(), &pids, &site, &request("ListSets"), Utc::now())
            .await
            .unwrap();
        assert!(xml.contains("<setSpec>user-c1</setSpec><setName>Community 1</setName>"));

        let xml = handle(pool.read(), &pids, &site, &request("ListMetadataFormats"), Utc::now())
            .await
            .unwrap();
        for prefix in ["oai_dc", "datacite", "oai_datacite", "datacite3", "oai_datacite3", "marcxml"] {
            assert!(xml.contains(&format!("<metadataPrefix>{}</metadataPrefix>", prefix)));
        }
    }

    #[tokio::test]
    async fn test_get_record() {
        let pool = DbPool::in_memory().await.unwrap();
        let pids = PidStore::new(ProviderRegistry::local());
        let site = SiteConfig::default();
        seed(pool.write(), &pids, 1, &["user-c1"], "2020-01-01T00:00:00Z").await;

        let mut req = request("GetRecord");
        req.identifier = Some("oai:zenodo.org:1".into());
        req.metadata_prefix = Some("oai_dc".into());
        let xml = handle(pool.read(), &pids, &site, &req, Utc::now()).await.unwrap();
        assert!(xml.contains("<identifier>oai:zenodo.org:1</identifier>"));
        assert!(xml.contains("<setSpec>user-c1</setSpec>"));
        assert!(xml.contains("<dc:title>Record 1</dc:title>"));

        req.metadata_prefix = Some("mods".into());
        let xml = handle(pool.read(), &pids, &site, &req, Utc::now()).await.unwrap();
        assert!(xml.contains(r#"code="cannotDisseminateFormat""#));

        req.metadata_prefix = Some("oai_dc".into());
        req.identifier = Some("oai:zenodo.org:404".into());
        let xml = handle(pool.read(), &pids, &site, &req, Utc::now()).await.unwrap();
        assert!(xml.contains(r#"code="idDoesNotExist""#));
    }

    #[tokio::test]
    async fn test_list_identifiers_filters_and_pages() {
        let pool = DbPool::in_memory().await.unwrap();
        let pids = PidStore::new(ProviderRegistry::local());
        let site = SiteConfig::default();
        for recid in 1..=(PAGE_SIZE as i32 + 5) {
            seed(pool.write(), &pids, recid, &["user-c1"], "2021-06-01T12:00:00Z").await;
        }
        seed(pool.write(), &pids, 999, &["user-c2"], "2019-01-01T00:00:00Z").await;

        let mut req = request("ListIdentifiers");
        req.metadata_prefix = Some("oai_dc".into());
        req.set = Some("user-c1".into());
        let xml = handle(pool.read(), &pids, &site, &req, Utc::now()).await.unwrap();
        assert_eq!(xml.matches("<header>").count(), PAGE_SIZE);
        assert!(!xml.contains("oai:zenodo.org:999"));

        let token = xml
            .split("cursor=\"0\">")
            .nth(1)
            .and_then(|rest| rest.split('<').next())
            .unwrap()
            .to_string();
        let mut next = request("ListIdentifiers");
        next.resumption_token = Some(token);
        let xml = handle(pool.read(), &pids, &site, &next, Utc::now()).await.unwrap();
        assert_eq!(xml.matches("<header>").count(), 5);

        let mut dated = request("ListRecords");
        dated.metadata_prefix = Some("oai_dc".into());
        dated.until = Some("2020-01-01".into());
        let xml = handle(pool.read(), &pids, &site, &dated, Utc::now()).await.unwrap();
        assert_eq!(xml.matches("<record>").count(), 1);
        assert!(xml.contains("oai:zenodo.org:999"));

        let mut bad = request("ListRecords");
        bad.metadata_prefix = Some("oai_dc".into());
        bad.from = Some("yesterday".into());
        let xml = handle(pool.read(), &pids, &site, &bad, Utc::now()).await.unwrap();
        assert!(xml.contains(r#"code="badArgument""#));

        let mut invalid = request("ListRecords");
        invalid.resumption_token = Some("garbage!".into());
        let xml = handle(pool.read(), &pids, &site, &invalid, Utc::now()).await.unwrap();
        assert!(xml.contains(r#"code="badResumptionToken""#));
    }
}
