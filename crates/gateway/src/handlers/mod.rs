//! API handlers module

pub mod deposit;
pub mod files;
pub mod health;
pub mod inbox;
pub mod oai;
pub mod records;
pub mod sitemap;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use zenodo_common::{Actor, AuthContext};

/// First address of `X-Forwarded-For`, or `X-Real-IP`
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

pub fn actor(auth: &AuthContext, headers: &HeaderMap) -> Actor {
    auth.actor(client_ip(headers))
}

/// Raw file download
pub fn file_response(key: &str, data: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", key.replace('"', ""));
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// XML document response
pub fn xml_response(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"))],
        body,
    )
        .into_response()
}
