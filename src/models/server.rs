use crate::errors::ToolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl ServerStatus {
    pub const ALL: [ServerStatus; 3] = [
        ServerStatus::Active,
        ServerStatus::Inactive,
        ServerStatus::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
            ServerStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = ToolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ToolError::invalid_field("status is required"));
        }
        ServerStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                ToolError::invalid_field(format!("invalid status: {}", value.trim()))
                    .with_hint("Use one of: active, inactive, maintenance.")
            })
    }
}

/// A registered remote host together with the SSH facts used to reach it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub ssh_password: Option<String>,
    pub ssh_private_key_path: Option<String>,
    pub status: ServerStatus,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Server {
    pub fn has_password(&self) -> bool {
        self.ssh_password.as_deref().is_some_and(|v| !v.is_empty())
    }

    pub fn has_private_key(&self) -> bool {
        self.ssh_private_key_path
            .as_deref()
            .is_some_and(|v| !v.is_empty())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            status: self.status,
            has_password: self.has_password(),
            has_private_key: self.has_private_key(),
            user_id: self.user_id,
            organization_id: self.organization_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.has_password())
            .field("ssh_private_key_path", &self.ssh_private_key_path)
            .field("status", &self.status)
            .field("user_id", &self.user_id)
            .field("organization_id", &self.organization_id)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Secret-free view handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub status: ServerStatus,
    pub has_password: bool,
    pub has_private_key: bool,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateServerRequest {
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: i64,
    pub username: String,
    pub ssh_password: Option<String>,
    pub ssh_private_key_path: Option<String>,
    pub status: Option<String>,
}

impl fmt::Debug for CreateServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateServerRequest")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("ssh_private_key_path", &self.ssh_private_key_path)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Partial update; `None` keeps the stored value, an empty credential string
/// clears it.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateServerRequest {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub username: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_private_key_path: Option<String>,
}

impl UpdateServerRequest {
    pub fn touches_connection(&self) -> bool {
        self.host.is_some()
            || self.port.is_some()
            || self.username.is_some()
            || self.ssh_password.is_some()
            || self.ssh_private_key_path.is_some()
    }
}

impl fmt::Debug for UpdateServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateServerRequest")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("ssh_private_key_path", &self.ssh_private_key_path)
            .finish_non_exhaustive()
    }
}
