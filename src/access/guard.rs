//! HTTP guards
//!
//! axum middleware that resolves the caller's session into an [`Identity`]
//! request extension and rejects requests that lack one. Rejections use the
//! uniform `{"success": false, "error": ...}` envelope.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/admin/users", get(list_users))
//!     .route_layer(middleware::from_fn_with_state(access.clone(), require_admin))
//!     .layer(middleware::from_fn_with_state(access, require_auth));
//! ```

use super::collaborator::{ApiEnvelope, IssueTracker, RepoPermission};
use super::control::AccessControl;
use super::token::Identity;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

/// Cookies checked for a session token, in order
const TOKEN_COOKIES: [&str; 2] = ["auth_token", "user_token"];

/// Result of a repository permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    /// No authenticated identity
    Unauthenticated,
    /// Authenticated, but the tracker does not grant the permission
    Forbidden,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    /// HTTP status for a refusal; `None` when granted
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AccessDecision::Granted => None,
            AccessDecision::Unauthenticated => Some(StatusCode::UNAUTHORIZED),
            AccessDecision::Forbidden => Some(StatusCode::FORBIDDEN),
        }
    }
}

impl AccessControl {
    /// Repository permission guard
    pub async fn authorize_repo(
        &self,
        tracker: &dyn IssueTracker,
        identity: Option<&Identity>,
        full_name: &str,
        level: RepoPermission,
    ) -> AccessDecision {
        let Some(identity) = identity else {
            return AccessDecision::Unauthenticated;
        };

        if self
            .check_repo_permission(tracker, identity, full_name, level)
            .await
        {
            AccessDecision::Granted
        } else {
            AccessDecision::Forbidden
        }
    }
}

/// Error response in the uniform envelope
pub fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiEnvelope::<()>::err(message))).into_response()
}

/// Session token from the bearer header, falling back to cookies
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    let cookies: Vec<(&str, &str)> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .collect();

    TOKEN_COOKIES.iter().find_map(|name| {
        cookies
            .iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.to_string())
    })
}

/// Require a valid session token
pub async fn require_auth(
    State(access): State<AccessControl>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers()) else {
        return reject(StatusCode::UNAUTHORIZED, "Authentication required");
    };

    match access.verify_token(&token) {
        Some(identity) => {
            debug!(username = %identity.username, path = %request.uri().path(), "Authenticated request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        None => reject(StatusCode::UNAUTHORIZED, "Invalid or expired token"),
    }
}

/// Require an administrator; must run after [`require_auth`]
pub async fn require_admin(
    State(access): State<AccessControl>,
    request: Request,
    next: Next,
) -> Response {
    let Some(username) = request
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.username.clone())
    else {
        return reject(StatusCode::UNAUTHORIZED, "Authentication required");
    };

    if !access.is_user_admin(&username).await {
        debug!(username = %username, "Admin access refused");
        return reject(StatusCode::FORBIDDEN, "Admin access required");
    }

    next.run(request).await
}
