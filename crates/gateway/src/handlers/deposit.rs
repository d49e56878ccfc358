//! Deposition API handlers

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::actor;
use crate::AppState;
use zenodo_common::{
    deposit::file_entry,
    errors::{AppError, Result},
    AuthContext,
};

/// Body of create and save requests
#[derive(Debug, Default, Deserialize)]
pub struct DepositRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Base64 encoded upload
#[derive(Debug, Deserialize, Validate)]
pub struct NewFileRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    pub filename: Option<String>,
}

/// Entry of a reorder request; either the file id or its name
#[derive(Debug, Deserialize)]
pub struct FileRef {
    pub id: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| AppError::InvalidFormat {
        message: format!("Malformed request body: {}", e),
    })
}

fn invalid(field: &str, e: validator::ValidationErrors) -> AppError {
    AppError::Validation {
        message: e.to_string(),
        field: Some(field.to_string()),
    }
}

/// Create a deposition, optionally with initial metadata
pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let request: DepositRequest = if body.is_empty() {
        DepositRequest::default()
    } else {
        parse_body(&body)?
    };

    let deposit = state.deposits.create(&actor(&auth, &headers), request.metadata).await?;
    let envelope = state.deposits.envelope(&deposit).await?;
    Ok((StatusCode::CREATED, Json(envelope)))
}

pub async fn get(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, Path(id): Path<i32>) -> Result<Json<Value>> {
    let deposit = state.deposits.get_for(&actor(&auth, &headers), id).await?;
    Ok(Json(state.deposits.envelope(&deposit).await?))
}

/// Replace the draft metadata
pub async fn update(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<Value>> {
    let metadata = request
        .metadata
        .ok_or_else(|| AppError::field("metadata", "Missing data for required field."))?;
    let deposit = state.deposits.update(&actor(&auth, &headers), id, &metadata).await?;
    Ok(Json(state.deposits.envelope(&deposit).await?))
}

pub async fn delete(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, Path(id): Path<i32>) -> Result<StatusCode> {
    state.deposits.delete(&actor(&auth, &headers), id).await?;
    tracing::info!(depid = id, user_id = auth.user_id, "Deposition deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Files
// ============================================================================

pub async fn list_files(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Value>>> {
    let deposit = state.deposits.get_for(&actor(&auth, &headers), id).await?;
    let site = &state.services.config.site;
    let files = state.deposits.list_files(&deposit).await?;
    Ok(Json(files.iter().map(|f| file_entry(site, f)).collect()))
}

/// Upload a file, either base64 in JSON or the raw body with `?filename=`
pub async fn add_file(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let (filename, data) = match query.filename {
        Some(filename) => (filename, body.to_vec()),
        None => {
            let request: NewFileRequest = parse_body(&body)?;
            request.validate().map_err(|e| invalid("filename", e))?;
            let data = STANDARD
                .decode(request.content.as_bytes())
                .map_err(|e| AppError::field("content", format!("Invalid base64 content: {}", e)))?;
            (request.filename, data)
        }
    };

    let file = state
        .deposits
        .add_file(&actor(&auth, &headers), id, &filename, &data)
        .await?;
    Ok((StatusCode::CREATED, Json(file_entry(&state.services.config.site, &file))))
}

pub async fn get_file(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((id, key)): Path<(i32, String)>,
) -> Result<Json<Value>> {
    let deposit = state.deposits.get_for(&actor(&auth, &headers), id).await?;
    let file = state
        .services
        .storage
        .get_object(state.services.db.read(), deposit.bucket_id, &key)
        .await?;
    Ok(Json(file_entry(&state.services.config.site, &file)))
}

pub async fn rename_file(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((id, key)): Path<(i32, String)>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<Value>> {
    request.validate().map_err(|e| invalid("filename", e))?;
    let file = state
        .deposits
        .rename_file(&actor(&auth, &headers), id, &key, &request.filename)
        .await?;
    Ok(Json(file_entry(&state.services.config.site, &file)))
}

pub async fn remove_file(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((id, key)): Path<(i32, String)>,
) -> Result<StatusCode> {
    state.deposits.remove_file(&actor(&auth, &headers), id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reorder the files; entries name files by id or filename
pub async fn reorder_files(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path(id): Path<i32>,
    Json(order): Json<Vec<FileRef>>,
) -> Result<Json<Vec<Value>>> {
    let actor = actor(&auth, &headers);
    let deposit = state.deposits.get_for(&actor, id).await?;
    let current = state.deposits.list_files(&deposit).await?;

    let keys = order
        .iter()
        .map(|entry| {
            let found = match (&entry.id, &entry.filename) {
                (Some(file_id), _) => current.iter().find(|f| f.version_id.to_string() == *file_id),
                (None, Some(name)) => current.iter().find(|f| &f.key == name),
                (None, None) => None,
            };
            found
                .map(|f| f.key.clone())
                .ok_or_else(|| AppError::field("files", "Unknown file in the requested order."))
        })
        .collect::<Result<Vec<_>>>()?;

    let files = state.deposits.reorder_files(&actor, id, &keys).await?;
    let site = &state.services.config.site;
    Ok(Json(files.iter().map(|f| file_entry(site, f)).collect()))
}

// ============================================================================
// Actions
// ============================================================================

/// `publish`, `edit`, `discard`, `newversion` and `reserve_doi`
pub async fn action(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((id, action)): Path<(i32, String)>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = actor(&auth, &headers);
    let deposits = &state.deposits;

    let (status, deposit) = match action.as_str() {
        "publish" => {
            let outcome = state.publisher.publish(&actor, id).await?;
            (StatusCode::ACCEPTED, outcome.deposit)
        }
        "edit" => (StatusCode::CREATED, deposits.edit(&actor, id).await?),
        "discard" => (StatusCode::CREATED, deposits.discard(&actor, id).await?),
        "newversion" => {
            deposits.new_version(&actor, id).await?;
            // The envelope of the source links to the new draft
            (StatusCode::CREATED, deposits.get(id).await?)
        }
        "reserve_doi" => {
            deposits.reserve_doi(&actor, id).await?;
            (StatusCode::OK, deposits.get(id).await?)
        }
        _ => return Err(AppError::not_found("action", &action)),
    };

    tracing::info!(depid = id, action = %action, user_id = actor.user_id, "Deposition action");
    Ok((status, Json(deposits.envelope(&deposit).await?)))
}
