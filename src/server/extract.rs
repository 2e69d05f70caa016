//! Request extractors.

use crate::db::User;
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::views::Access;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sessionid";

/// The requesting user, if any, and the path they asked for.
#[derive(Debug, Clone)]
pub struct Viewer {
    /// Logged-in user.
    pub user: Option<User>,
    /// Session token the user was found by.
    pub token: Option<String>,
    /// Request path and query, for login's `next`.
    pub path: String,
}

impl Viewer {
    /// Apply a view's gate, returning the user when there is one.
    pub fn gate(&self, state: &AppState, access: Access) -> Result<Option<&User>> {
        access.check(&state.auth, self.user.as_ref(), &self.path)
    }

    /// Apply a gate that needs a logged-in user.
    pub fn require(&self, state: &AppState, access: Access) -> Result<&User> {
        self.gate(state, access)?
            .ok_or_else(|| AppError::LoginRequired {
                next: self.path.clone(),
            })
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let token = extract_token(&parts.headers);
        let user = match &token {
            Some(token) => state.auth.validate_token(token)?,
            None => None,
        };

        Ok(Viewer {
            token: user.as_ref().and(token),
            user,
            path,
        })
    }
}

/// Session token from a `Bearer` header or the session cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
    })
}

/// Session cookie carrying `token`.
pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> Result<Cookie<'static>> {
    let mut raw = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, token, max_age_seconds
    );
    if secure {
        raw.push_str("; Secure");
    }
    Cookie::parse(raw).map_err(|e| AppError::Internal(format!("Invalid session cookie: {}", e)))
}

/// Cookie that clears the session on the client.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}
