use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::{header, request::Parts, HeaderMap, HeaderValue},
};

use super::error::ApiError;
use super::AppState;
use crate::transport::Transporter;

pub const SESSION_COOKIE: &str = "securerails_session";

/// `axum::Json` whose rejections render as validation errors
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Transporter behind the request's session cookie, if any
pub struct SessionTransporter(pub Option<Transporter>);

impl SessionTransporter {
    pub fn require(self) -> Result<Transporter, ApiError> {
        self.0
            .ok_or_else(|| ApiError::Unauthorized("Not logged in".to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionTransporter {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match session_token(&parts.headers) {
            Some(token) => Ok(Self(state.sessions.authenticate(&token).await?)),
            None => Ok(Self(None)),
        }
    }
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue, ApiError> {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, ApiError> {
    session_cookie("", 0, secure)
}

/// Picks the acting transporter from the payload and the session
///
/// The payload wins when present but may not contradict a live session.
pub fn acting_transporter(
    payload: Option<&str>,
    session: Option<&Transporter>,
) -> Result<Option<String>, ApiError> {
    let payload = payload.map(str::trim).filter(|id| !id.is_empty());
    match (payload, session) {
        (Some(id), Some(current)) if id != current.id => Err(ApiError::Validation(
            "transporterId does not match the logged-in transporter".to_string(),
        )),
        (Some(id), _) => Ok(Some(id.to_string())),
        (None, Some(current)) => Ok(Some(current.id.clone())),
        (None, None) => Ok(None),
    }
}
