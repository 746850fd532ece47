//! Caller identity for the management API.
//!
//! Authentication itself happens upstream. In `proxy` mode the authenticator
//! forwards the user id in a trusted header; in `none` mode every caller is an
//! anonymous admin.

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{AuthConfig, AuthMode};
use crate::error::AppError;
use crate::models::Link;

/// Identity attached to every `/api` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Option<String>,
    pub is_admin: bool,
}

impl Caller {
    pub fn admin() -> Self {
        Self {
            id: None,
            is_admin: true,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            is_admin: false,
        }
    }

    pub fn can_access(&self, link: &Link) -> bool {
        self.is_admin || (self.id.is_some() && self.id == link.created_by)
    }
}

pub struct AuthService {
    mode: AuthMode,
    user_header: String,
    admins: HashSet<String>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            mode: config.mode.clone(),
            user_header: config.user_header.to_lowercase(),
            admins: config.admin_users.iter().cloned().collect(),
        }
    }

    pub fn identify(&self, headers: &HeaderMap) -> Option<Caller> {
        match self.mode {
            AuthMode::None => Some(Caller::admin()),
            AuthMode::Proxy => {
                let id = headers
                    .get(self.user_header.as_str())
                    .and_then(|h| h.to_str().ok())
                    .map(str::trim)
                    .filter(|id| !id.is_empty())?;

                Some(Caller {
                    id: Some(id.to_string()),
                    is_admin: self.admins.contains(id),
                })
            }
        }
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.identify(&headers) {
        Some(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        None => AppError::unauthorized("missing caller identity").into_response(),
    }
}
