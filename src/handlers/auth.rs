/// Request authentication extractor
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{HeaderMap, Uri, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use tracing::debug;

use crate::api::ApiError;
use crate::app_state::AppState;
use crate::auth::{PresentedCredentials, Principal};

/// The principal a request was authorised as. Rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = presented_credentials(&parts.headers, &parts.uri, state.auth.cookie_name());
        match state.auth.authorize(&presented) {
            Ok(principal) => Ok(Authenticated(principal)),
            Err(e) => {
                debug!("Rejected request to {}: {}", parts.uri.path(), e);
                Err(e.into())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Collect every credential form a request may carry:
/// `Authorization: Bearer|Basic`, `?token=` and the token cookie
pub(crate) fn presented_credentials(headers: &HeaderMap, uri: &Uri, cookie_name: &str) -> PresentedCredentials {
    let mut presented = PresentedCredentials::default();

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some((scheme, rest)) = value.trim().split_once(' ') {
            if scheme.eq_ignore_ascii_case("bearer") {
                presented.token = Some(rest.trim().to_string());
            } else if scheme.eq_ignore_ascii_case("basic") {
                presented.basic = decode_basic(rest.trim());
            }
        }
    }

    if presented.token.is_none() {
        presented.token = Query::<TokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty())
            .or_else(|| cookie_value(headers, cookie_name));
    }
    presented
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, secret) = decoded.split_once(':')?;
    Some((user.to_string(), secret.to_string()))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
