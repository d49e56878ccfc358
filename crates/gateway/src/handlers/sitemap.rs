//! Cached sitemap pages

use axum::{
    extract::{Path, State},
    response::Response,
};

use super::xml_response;
use crate::AppState;
use zenodo_common::{
    errors::{AppError, Result},
    sitemap,
};

/// `sitemap.xml` is the index, `sitemap<n>.xml` page n
fn page_number(file: &str) -> Option<usize> {
    let middle = file.strip_prefix("sitemap")?.strip_suffix(".xml")?;
    if middle.is_empty() {
        Some(0)
    } else {
        middle.parse().ok().filter(|n| *n > 0)
    }
}

pub async fn serve(State(state): State<AppState>, Path(file): Path<String>) -> Result<Response> {
    let page = page_number(&file).ok_or_else(|| AppError::not_found("page", &file))?;
    let xml = sitemap::page(&state.services.cache, page)
        .await?
        .ok_or_else(|| AppError::not_found("sitemap", &file))?;
    Ok(xml_response(xml))
}
