//! OAI-PMH endpoint

use axum::{
    extract::{Query, State},
    response::Response,
    Form,
};
use chrono::Utc;

use super::xml_response;
use crate::AppState;
use zenodo_common::{errors::Result, oaiset::pmh};

async fn serve(state: &AppState, request: &pmh::OaiRequest) -> Result<Response> {
    let services = &state.services;
    let xml = pmh::handle(
        services.db.read(),
        &services.pids,
        &services.config.site,
        request,
        Utc::now(),
    )
    .await?;
    Ok(xml_response(xml))
}

pub async fn get(State(state): State<AppState>, Query(request): Query<pmh::OaiRequest>) -> Result<Response> {
    serve(&state, &request).await
}

pub async fn post(State(state): State<AppState>, Form(request): Form<pmh::OaiRequest>) -> Result<Response> {
    serve(&state, &request).await
}
