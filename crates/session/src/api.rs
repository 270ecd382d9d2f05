// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unauthenticated auth endpoints and their wire contracts.
//!
//! Every endpoint has exactly one response envelope (top-level camelCase
//! fields). A body that does not match is a [`AuthError::Decode`].

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AuthError;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const PROFILE_PATH: &str = "/user/profile";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when the server rotates the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token.
pub trait RefreshBackend: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResponse, AuthError>> + Send + 'a>>;
}

/// Client for the auth endpoints that do not go through the bearer pipeline.
#[derive(Debug, Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    base: String,
}

impl AuthApi {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base: base_url.trim_end_matches('/').to_owned() }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Resolve `path` against the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base)
        } else {
            format!("{}/{path}", self.base)
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let body = LoginRequest { email: email.to_owned(), password: password.to_owned() };
        let resp = self
            .http
            .post(self.url(LOGIN_PATH))
            .json(&body)
            .send()
            .await
            .map_err(AuthError::network)?;
        let status = resp.status();
        let text = resp.text().await.map_err(AuthError::network)?;
        if is_validation_status(status) {
            return Err(AuthError::Validation(server_message(&text, "invalid credentials")));
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        decode_envelope(LOGIN_PATH, &text)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, AuthError> {
        let resp = self
            .http
            .post(self.url(REGISTER_PATH))
            .json(request)
            .send()
            .await
            .map_err(AuthError::network)?;
        let status = resp.status();
        let text = resp.text().await.map_err(AuthError::network)?;
        if is_validation_status(status) || status == StatusCode::CONFLICT {
            return Err(AuthError::Validation(server_message(&text, "registration rejected")));
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        let response: RegisterResponse = decode_envelope(REGISTER_PATH, &text)?;
        if !response.success {
            let message = response.message.unwrap_or_else(|| "registration rejected".to_owned());
            return Err(AuthError::Validation(message));
        }
        Ok(response)
    }

    /// Perform a single refresh request. Never retried.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse, AuthError> {
        let body = RefreshRequest { refresh_token: refresh_token.to_owned() };
        let resp = self
            .http
            .post(self.url(REFRESH_PATH))
            .json(&body)
            .send()
            .await
            .map_err(AuthError::network)?;
        let status = resp.status();
        let text = resp.text().await.map_err(AuthError::network)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        decode_envelope(REFRESH_PATH, &text)
    }

    /// Fetch the profile with an explicit bearer token.
    ///
    /// Bypasses the refresh-and-retry pipeline so a failed fetch can never
    /// end the session.
    pub async fn profile(&self, access_token: &str) -> Result<Map<String, Value>, AuthError> {
        let resp = self
            .http
            .get(self.url(PROFILE_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(AuthError::network)?;
        let status = resp.status();
        let text = resp.text().await.map_err(AuthError::network)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        decode_envelope(PROFILE_PATH, &text)
    }

    /// Tell the server the session is over. Callers ignore the outcome.
    pub async fn logout(&self, access_token: Option<&str>) -> Result<(), AuthError> {
        let mut req = self.http.post(self.url(LOGOUT_PATH));
        if let Some(token) = access_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(AuthError::network)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        Ok(())
    }
}

impl RefreshBackend for AuthApi {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResponse, AuthError>> + Send + 'a>> {
        Box::pin(self.refresh_token(refresh_token))
    }
}

fn is_validation_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY
    )
}

/// Map a non-success status to an error; 401 becomes [`AuthError::Rejected`].
pub(crate) fn status_error(status: StatusCode, body: &str) -> AuthError {
    let message = server_message(body, status.canonical_reason().unwrap_or("error"));
    if status == StatusCode::UNAUTHORIZED {
        return AuthError::Rejected(message);
    }
    AuthError::Status { status: status.as_u16(), message }
}

/// Pull `message` (or `error`) out of a JSON error body, else the raw text.
pub(crate) fn server_message(body: &str, fallback: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(Value::String(msg)) = map.get(key) {
                return msg.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, AuthError> {
    serde_json::from_str(body).map_err(|e| {
        debug!(path, err = %e, "response envelope mismatch");
        AuthError::Decode(format!("{path}: {e}"))
    })
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
