// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authenticated request pipeline.
//!
//! Before send: attach the access token, refreshing it first if expired.
//! After receive: a 401 on a bearer request triggers one refresh and one
//! replay. A replay that is rejected again, or that fails in transport,
//! ends the session.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{decode_envelope, status_error, AuthApi};
use crate::error::AuthError;
use crate::events::LogoutReason;
use crate::expiry::ExpiryPolicy;
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// HTTP client bound to a session. Cheap to clone.
#[derive(Clone)]
pub struct AuthClient {
    api: AuthApi,
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    policy: ExpiryPolicy,
}

impl AuthClient {
    pub(crate) fn new(
        api: AuthApi,
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        policy: ExpiryPolicy,
    ) -> Self {
        Self { api, store, coordinator, policy }
    }

    /// Start a request against `path`, resolved on the API base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.api.http().request(method, self.api.url(path))
    }

    /// Send a request through the pipeline.
    pub async fn send(&self, request: Request) -> Result<Response, AuthError> {
        let mut replay = request.try_clone();
        let mut first = Some(request);
        self.dispatch(move || {
            first
                .take()
                .or_else(|| replay.take())
                .ok_or_else(|| AuthError::Rejected("request body cannot be replayed".into()))
        })
        .await
    }

    /// Run one attempt, and on a bearer 401 one replay. `build` yields the
    /// request for each attempt.
    async fn dispatch<F>(&self, mut build: F) -> Result<Response, AuthError>
    where
        F: FnMut() -> Result<Request, AuthError>,
    {
        let generation = self.store.generation();
        let mut request = build()?;

        let sent_token = self.authorize(&mut request).await?;
        let resp = self.api.http().execute(request).await.map_err(AuthError::network)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        let Some(sent_token) = sent_token else {
            return Ok(resp);
        };

        debug!(url = %resp.url(), "request rejected, refreshing and replaying once");
        let token = self.token_after_rejection(&sent_token).await?;
        let mut replay = build()?;
        set_bearer(&mut replay, &token)?;

        match self.api.http().execute(replay).await {
            Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                warn!(url = %resp.url(), "replayed request rejected, ending session");
                self.store.clear_if_current(generation, LogoutReason::Rejected);
                let text = resp.text().await.unwrap_or_default();
                Err(status_error(StatusCode::UNAUTHORIZED, &text))
            }
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(err = %e, "replayed request failed, ending session");
                self.store.clear_if_current(generation, LogoutReason::Rejected);
                Err(AuthError::network(e))
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let request = self.request(Method::GET, path).build().map_err(AuthError::network)?;
        self.fetch(request).await
    }

    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request =
            self.request(Method::GET, path).query(query).build().map_err(AuthError::network)?;
        self.fetch(request).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let request = self.request(Method::DELETE, path).build().map_err(AuthError::network)?;
        self.fetch(request).await
    }

    /// POST a url-encoded form.
    pub async fn post_urlencoded<T, B>(&self, path: &str, form: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request =
            self.request(Method::POST, path).form(form).build().map_err(AuthError::network)?;
        self.fetch(request).await
    }

    /// POST `multipart/form-data`. Multipart bodies are streamed and cannot
    /// be cloned, so `form` is called again to build the replay.
    pub async fn post_form<T, F>(&self, path: &str, form: F) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        F: Fn() -> Form,
    {
        let url = self.api.url(path);
        let resp = self
            .dispatch(|| {
                self.api
                    .http()
                    .post(url.as_str())
                    .multipart(form())
                    .build()
                    .map_err(AuthError::network)
            })
            .await?;
        let path = resp.url().path().to_owned();
        read_json(&path, resp).await
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: &B) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.request(method, path).json(body).build().map_err(AuthError::network)?;
        self.fetch(request).await
    }

    /// Send, then decode a JSON body. An empty body decodes as `null`.
    async fn fetch<T: DeserializeOwned>(&self, request: Request) -> Result<T, AuthError> {
        let path = request.url().path().to_owned();
        let resp = self.send(request).await?;
        read_json(&path, resp).await
    }

    /// Attach a usable token, if the session has one. Returns the token sent.
    async fn authorize(&self, request: &mut Request) -> Result<Option<String>, AuthError> {
        let Some(token) = self.store.access_token() else {
            return Ok(None);
        };
        let token = if self.policy.is_expired(&token) {
            debug!("access token expired, refreshing before send");
            self.coordinator.refresh().await?
        } else {
            token
        };
        set_bearer(request, &token)?;
        Ok(Some(token))
    }

    /// A fresh token after the server rejected `sent`. Reuses a token that
    /// another caller already refreshed meanwhile.
    async fn token_after_rejection(&self, sent: &str) -> Result<String, AuthError> {
        match self.store.access_token() {
            Some(current) if current != sent && !self.policy.is_expired(&current) => Ok(current),
            _ => self.coordinator.refresh().await,
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &str, resp: Response) -> Result<T, AuthError> {
    let status = resp.status();
    let text = resp.text().await.map_err(AuthError::network)?;
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    let body = if text.trim().is_empty() { "null" } else { text.as_str() };
    decode_envelope(path, body)
}

fn set_bearer(request: &mut Request, token: &str) -> Result<(), AuthError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| AuthError::Decode("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
