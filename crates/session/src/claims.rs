// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access-token payload decoding.
//!
//! Tokens are treated as opaque three-segment bearer credentials. Only the
//! payload segment is read; signatures are never checked on the client.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The `role` claim is issued either as a single string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleClaim {
    One(String),
    Many(Vec<String>),
}

impl RoleClaim {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(role) => vec![role.clone()],
            Self::Many(roles) => roles.clone(),
        }
    }
}

/// Subject ids show up as strings or numbers depending on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Decoded access-token claims.
///
/// Any payload that is a JSON object decodes. A modelled claim that is null
/// or of an unexpected type reads as absent; `raw` still carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    #[serde(default, deserialize_with = "lenient")]
    pub sub: Option<SubjectId>,
    /// Legacy subject field, consulted when `sub` is absent.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<SubjectId>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<RoleClaim>,
    #[serde(default, deserialize_with = "lenient")]
    pub permissions: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_active: Option<bool>,
    /// Issued-at, seconds since epoch.
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub iat: Option<f64>,
    /// Expiry, seconds since epoch.
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub exp: Option<f64>,
    /// Every claim as issued, including ones not modelled above.
    #[serde(skip)]
    pub raw: Map<String, Value>,
}

/// Read a claim, falling back to the default when it is null or mistyped.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Timestamps arrive as numbers, or occasionally as numeric strings.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

impl Claims {
    pub fn subject(&self) -> Option<String> {
        self.sub.as_ref().or(self.id.as_ref()).map(ToString::to_string)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.username.as_deref().or(self.name.as_deref())
    }

    pub fn roles(&self) -> Vec<String> {
        self.role.as_ref().map(RoleClaim::to_vec).unwrap_or_default()
    }

    /// Expiry as milliseconds since epoch.
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.exp.filter(|e| e.is_finite()).map(|e| (e * 1000.0) as i64)
    }

    pub fn issued_at_ms(&self) -> Option<i64> {
        self.iat.filter(|e| e.is_finite()).map(|e| (e * 1000.0) as i64)
    }
}

/// Decode the payload of a bearer token. Returns `None` when the token is not
/// three segments, the payload is not base64, or it is not a JSON object.
pub fn decode(token: &str) -> Option<Claims> {
    let raw = decode_payload(token)?;
    let mut claims: Claims = serde_json::from_value(Value::Object(raw.clone())).ok()?;
    claims.raw = raw;
    Some(claims)
}

/// Look up a single raw claim by key.
pub fn claim(token: &str, key: &str) -> Option<Value> {
    decode_payload(token)?.remove(key)
}

fn decode_payload(token: &str) -> Option<Map<String, Value>> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return None;
    };

    let mut standard: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    let bytes = STANDARD.decode(standard).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    match serde_json::from_str(&text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
