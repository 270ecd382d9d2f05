// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The authenticated principal, derived from claims.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::claims::{Claims, RoleClaim, SubjectId};

/// Identity and authorization data of the logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub is_active: bool,
    /// Profile fields with no dedicated slot above.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub profile: Map<String, Value>,
}

impl Principal {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            id: claims.subject(),
            email: claims.email.clone(),
            name: claims.display_name().map(str::to_owned),
            roles: claims.roles(),
            permissions: claims.permissions.clone(),
            is_active: claims.is_active.unwrap_or(true),
            profile: Map::new(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Overlay a profile payload. Known keys replace claims-derived values
    /// when they parse; everything else lands in `profile`.
    pub fn merge_profile(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            match key.as_str() {
                "id" | "sub" | "_id" => {
                    if let Ok(id) = serde_json::from_value::<SubjectId>(value.clone()) {
                        self.id = Some(id.to_string());
                    }
                }
                "email" => {
                    if let Some(email) = value.as_str() {
                        self.email = Some(email.to_owned());
                    }
                }
                "name" | "username" | "fullName" => {
                    if let Some(name) = value.as_str() {
                        self.name = Some(name.to_owned());
                    }
                }
                "role" | "roles" => {
                    if let Ok(role) = serde_json::from_value::<RoleClaim>(value.clone()) {
                        self.roles = role.to_vec();
                    }
                }
                "permissions" => {
                    if let Ok(permissions) = serde_json::from_value::<Vec<String>>(value.clone()) {
                        self.permissions = permissions;
                    }
                }
                "isActive" => {
                    if let Some(active) = value.as_bool() {
                        self.is_active = active;
                    }
                }
                _ => {
                    self.profile.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "principal_tests.rs"]
mod tests;
