//! Transporter login, logout and identity endpoints

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiResult;
use super::extract::{clear_session_cookie, session_cookie, session_token, ApiJson, SessionTransporter};
use super::{ok, AppState, Envelope};
use crate::transport::Transporter;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TransporterView {
    pub id: String,
    pub name: String,
    pub contact: Option<String>,
    pub assigned_batch: Option<String>,
}

impl From<Transporter> for TransporterView {
    fn from(t: Transporter) -> Self {
        Self {
            id: t.id,
            name: t.name,
            contact: t.contact,
            assigned_batch: t.assigned_batch,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransporterResponse {
    pub transporter: TransporterView,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Response> {
    let session = state.sessions.login(&req.username, &req.password).await?;

    let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
    let cookie = session_cookie(&session.token, max_age, state.config.server.cookie_secure)?;

    let mut response = ok(TransporterResponse {
        transporter: session.transporter.into(),
    })
    .into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = session_token(&headers) {
        state.sessions.logout(&token).await?;
    }

    let mut response = ok(Empty {}).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie(state.config.server.cookie_secure)?);
    Ok(response)
}

pub async fn me(session: SessionTransporter) -> ApiResult<Json<Envelope<TransporterResponse>>> {
    let transporter = session.require()?;
    Ok(ok(TransporterResponse {
        transporter: transporter.into(),
    }))
}

