//! Published record handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::file_response;
use crate::AppState;
use zenodo_common::{
    deposit::firerole::Firerole,
    errors::{AppError, Result},
    records, AuthContext,
};

/// Keys kept out of the public record representation
const PRIVATE_KEYS: &[&str] = &["_internal"];

pub async fn get(State(state): State<AppState>, Path(recid): Path<String>) -> Result<Json<Value>> {
    let services = &state.services;
    let record = records::get_by_recid(services.db.read(), &services.pids, &recid).await?;

    let mut metadata = record.json.clone();
    if let Some(map) = metadata.as_object_mut() {
        for key in PRIVATE_KEYS {
            map.remove(*key);
        }
    }

    let url = services.config.site.record_url(&recid);
    Ok(Json(json!({
        "id": record.json.get("recid").cloned().unwrap_or(Value::Null),
        "doi": record.json.get("doi").cloned().unwrap_or(Value::Null),
        "conceptrecid": record.json.get("conceptrecid").cloned().unwrap_or(Value::Null),
        "metadata": metadata,
        "revision": record.version_id,
        "created": record.created.to_rfc3339(),
        "updated": record.updated.to_rfc3339(),
        "links": {"self": url},
    })))
}

/// Landing target for denied file downloads
pub async fn restricted(Path(recid): Path<String>) -> AppError {
    AppError::Forbidden {
        message: format!("Files of record {} are restricted.", recid),
    }
}

/// Download a record file, subject to its access rule
pub async fn download(
    State(state): State<AppState>,
    auth: Option<AuthContext>,
    Path((recid, key)): Path<(String, String)>,
) -> Result<Response> {
    let services = &state.services;
    let db = services.db.read();
    let record = records::get_by_recid(db, &services.pids, &recid).await?;

    let entry = record
        .json
        .get("_files")
        .and_then(Value::as_array)
        .and_then(|files| files.iter().find(|f| f.get("key").and_then(Value::as_str) == Some(key.as_str())))
        .ok_or_else(|| AppError::not_found("file", &key))?;

    let rule = match entry.get("restriction").and_then(Value::as_str) {
        Some(text) => Firerole::parse(text)?,
        None => Firerole::for_access("closed", "", None),
    };
    let is_admin = auth.as_ref().is_some_and(|a| a.is_admin());
    let email = auth.as_ref().and_then(|a| a.email.as_deref());
    if !is_admin && !rule.allows(email, Utc::now().date_naive()) {
        tracing::debug!(recid = %recid, key = %key, "File access denied");
        let location = format!("/record/{}/restricted", recid);
        return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
    }

    let bucket = entry
        .get("bucket")
        .and_then(Value::as_str)
        .and_then(|b| Uuid::parse_str(b).ok())
        .ok_or_else(|| AppError::Integrity {
            message: format!("Record {} has no bucket for {}", recid, key),
        })?;
    let (_, data) = services.storage.open(db, bucket, &key).await?;
    Ok(file_response(&key, data))
}
