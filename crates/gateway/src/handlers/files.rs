//! Direct bucket access for deposition buckets

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use super::{actor, file_response};
use crate::AppState;
use zenodo_common::{deposit::file_entry, errors::Result, AuthContext};

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path(bucket_id): Path<Uuid>,
) -> Result<Json<Vec<Value>>> {
    let deposit = state.deposits.get_by_bucket(&actor(&auth, &headers), bucket_id).await?;
    let files = state.deposits.list_files(&deposit).await?;
    let site = &state.services.config.site;
    Ok(Json(files.iter().map(|f| file_entry(site, f)).collect()))
}

pub async fn download(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((bucket_id, key)): Path<(Uuid, String)>,
) -> Result<Response> {
    state.deposits.get_by_bucket(&actor(&auth, &headers), bucket_id).await?;
    let (_, data) = state
        .services
        .storage
        .open(state.services.db.read(), bucket_id, &key)
        .await?;
    Ok(file_response(&key, data))
}

/// Store the raw body under `key`
pub async fn upload(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((bucket_id, key)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<Json<Value>> {
    let actor = actor(&auth, &headers);
    let deposit = state.deposits.get_by_bucket(&actor, bucket_id).await?;
    let file = state.deposits.add_file(&actor, deposit.depid, &key, &body).await?;
    Ok(Json(file_entry(&state.services.config.site, &file)))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Path((bucket_id, key)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    let actor = actor(&auth, &headers);
    let deposit = state.deposits.get_by_bucket(&actor, bucket_id).await?;
    state.deposits.remove_file(&actor, deposit.depid, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
