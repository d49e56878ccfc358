//! Caller identity
//!
//! Provides:
//! - Identity context trusted from the upstream proxy headers
//! - Conversion into the acting identity of the deposition services
//! - Axum extractors (required and optional)

use crate::deposit::Actor;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the authenticated user e-mail
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Header carrying comma separated roles
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Role granting access to every deposition
pub const ADMIN_ROLE: &str = "admin";

/// Identity of the caller of a service operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// User ID
    pub user_id: i32,

    /// User e-mail (used in file access rules and notifications)
    pub email: Option<String>,

    /// Roles granted by the identity provider
    pub roles: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    /// Build a context for a regular user
    pub fn user(user_id: i32, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: Some(email.into()),
            roles: Vec::new(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context used by operator commands and background jobs
    pub fn system() -> Self {
        Self {
            user_id: 0,
            email: None,
            roles: vec![ADMIN_ROLE.to_string()],
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Acting identity for the deposition services
    pub fn actor(&self, ip_address: Option<String>) -> Actor {
        Actor {
            user_id: self.user_id,
            email: self.email.clone().unwrap_or_default(),
            username: None,
            is_admin: self.is_admin(),
            ip_address,
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

fn context_from_parts(parts: &Parts) -> Result<Option<AuthContext>> {
    let Some(raw_id) = header(parts, USER_ID_HEADER) else {
        return Ok(None);
    };

    let user_id = raw_id.trim().parse::<i32>().map_err(|_| AppError::Unauthorized {
        message: format!("Invalid {} header", USER_ID_HEADER),
    })?;

    let request_id = header(parts, "x-request-id")
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let roles = header(parts, USER_ROLES_HEADER)
        .map(|r| {
            r.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(AuthContext {
        user_id,
        email: header(parts, USER_EMAIL_HEADER).map(String::from),
        roles,
        request_id,
    }))
}

/// Axum extractor for AuthContext; rejects anonymous requests
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        context_from_parts(parts)?.ok_or_else(|| AppError::Unauthorized {
            message: format!("Missing {} header", USER_ID_HEADER),
        })
    }
}

/// Optional extractor for endpoints open to anonymous callers
impl<S> OptionalFromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>> {
        context_from_parts(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/deposit");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_context_from_headers() {
        let parts = parts(&[
            (USER_ID_HEADER, "42"),
            (USER_EMAIL_HEADER, "owner@example.org"),
            (USER_ROLES_HEADER, "curator, admin"),
        ]);

        let ctx = context_from_parts(&parts).unwrap().unwrap();
        assert_eq!(ctx.user_id, 42);
        assert_eq!(ctx.email.as_deref(), Some("owner@example.org"));
        assert!(ctx.is_admin());
    }

    #[test]
    fn test_anonymous_and_invalid() {
        assert!(context_from_parts(&parts(&[])).unwrap().is_none());
        assert!(context_from_parts(&parts(&[(USER_ID_HEADER, "abc")])).is_err());
    }

    #[test]
    fn test_actor() {
        let actor = AuthContext::user(1, "a@example.org").actor(Some("10.0.0.1".into()));
        assert_eq!(actor.user_id, 1);
        assert_eq!(actor.email, "a@example.org");
        assert!(!actor.is_admin);
        assert_eq!(actor.ip_address.as_deref(), Some("10.0.0.1"));
        assert!(AuthContext::system().actor(None).is_admin);
    }
}
