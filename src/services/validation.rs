use crate::constants::limits::{MAX_PORT, MIN_PORT, NAME_MAX_LEN, NAME_MIN_LEN};
use crate::constants::private_key::ALLOWED_EXTENSIONS;
use crate::errors::ToolError;
use crate::models::{CreateServerRequest, ServerStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::path::Path;
use uuid::Uuid;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-_\s]+$").expect("server name regex"));
static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("hostname regex")
});
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-_]+$").expect("username regex"));

/// Create request after structural validation.
#[derive(Clone, PartialEq)]
pub struct ServerDraft {
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub ssh_password: Option<String>,
    pub ssh_private_key_path: Option<String>,
    pub status: ServerStatus,
}

/// Stateless structural checks for server records and tool arguments.
#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_id(&self, value: &str, label: &str) -> Result<Uuid, ToolError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_field(format!("{} is required", label)));
        }
        Uuid::parse_str(trimmed)
            .map_err(|_| ToolError::invalid_field(format!("invalid {}: {}", label, trimmed)))
    }

    pub fn validate_name(&self, name: &str) -> Result<(), ToolError> {
        if name.is_empty() {
            return Err(ToolError::invalid_field("server name is required"));
        }
        let len = name.chars().count();
        if len < NAME_MIN_LEN {
            return Err(ToolError::invalid_field("server name too short"));
        }
        if len > NAME_MAX_LEN {
            return Err(ToolError::invalid_field("server name too long"));
        }
        if !NAME_RE.is_match(name) {
            return Err(ToolError::invalid_field("invalid server name").with_hint(
                "Use letters, digits, hyphens, underscores and spaces only.",
            ));
        }
        Ok(())
    }

    pub fn validate_host(&self, host: &str) -> Result<(), ToolError> {
        if host.is_empty() {
            return Err(ToolError::invalid_field("host is required"));
        }
        if host.parse::<IpAddr>().is_ok() || HOSTNAME_RE.is_match(host) {
            return Ok(());
        }
        Err(ToolError::invalid_field(format!("invalid host: {}", host)))
    }

    pub fn validate_port(&self, port: i64) -> Result<u16, ToolError> {
        if port <= 0 {
            return Err(ToolError::invalid_field("port is required"));
        }
        if port < MIN_PORT as i64 || port > MAX_PORT as i64 {
            return Err(ToolError::invalid_field(format!(
                "port must be an integer between {} and {}",
                MIN_PORT, MAX_PORT
            )));
        }
        Ok(port as u16)
    }

    pub fn validate_username(&self, username: &str) -> Result<(), ToolError> {
        if username.is_empty() {
            return Err(ToolError::invalid_field("username is required"));
        }
        if !USERNAME_RE.is_match(username) {
            return Err(ToolError::invalid_field(format!(
                "invalid username: {}",
                username
            )));
        }
        Ok(())
    }

    pub fn validate_private_key_path(&self, path: &str) -> Result<(), ToolError> {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return Err(ToolError::invalid_field(
                "ssh_private_key_path must be an absolute path",
            ));
        }
        if let Some(ext) = candidate.extension().and_then(|e| e.to_str()) {
            if !ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                return Err(ToolError::invalid_field(format!(
                    "invalid ssh private key path: unsupported extension .{}",
                    ext
                )));
            }
        }
        Ok(())
    }

    /// At most one credential may be set. `require_one` additionally rejects
    /// a record with neither.
    pub fn validate_ssh_auth(
        &self,
        password: Option<&str>,
        private_key_path: Option<&str>,
        require_one: bool,
    ) -> Result<(), ToolError> {
        let has_password = password.is_some_and(|p| !p.is_empty());
        let key = private_key_path.filter(|k| !k.is_empty());
        if has_password && key.is_some() {
            return Err(ToolError::invalid_field(
                "provide either ssh_password or ssh_private_key_path, not both",
            ));
        }
        if require_one && !has_password && key.is_none() {
            return Err(ToolError::invalid_field(
                "either ssh_password or ssh_private_key_path is required",
            ));
        }
        if let Some(path) = key {
            self.validate_private_key_path(path)?;
        }
        Ok(())
    }

    pub fn validate_status(&self, status: &str) -> Result<ServerStatus, ToolError> {
        status.parse()
    }

    pub fn validate_create(&self, req: &CreateServerRequest) -> Result<ServerDraft, ToolError> {
        let name = req.name.trim().to_string();
        let host = req.host.trim().to_string();
        let username = req.username.trim().to_string();
        self.validate_name(&name)?;
        self.validate_host(&host)?;
        let port = self.validate_port(req.port)?;
        self.validate_username(&username)?;
        let ssh_password = non_empty(req.ssh_password.as_deref());
        let ssh_private_key_path = non_empty(req.ssh_private_key_path.as_deref());
        self.validate_ssh_auth(
            ssh_password.as_deref(),
            ssh_private_key_path.as_deref(),
            true,
        )?;
        let status = match req.status.as_deref().map(str::trim) {
            None | Some("") => ServerStatus::Active,
            Some(raw) => self.validate_status(raw)?,
        };
        Ok(ServerDraft {
            name,
            description: req.description.trim().to_string(),
            host,
            port,
            username,
            ssh_password,
            ssh_private_key_path: ssh_private_key_path.map(|p| p.trim().to_string()),
            status,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateServerRequest {
        CreateServerRequest {
            name: "edge node_1".to_string(),
            description: " primary ".to_string(),
            host: "edge-1.example.com".to_string(),
            port: 22,
            username: "deploy".to_string(),
            ssh_password: Some("s3cret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_a_well_formed_create() {
        let draft = Validation::new().validate_create(&request()).unwrap();
        assert_eq!(draft.port, 22);
        assert_eq!(draft.status, ServerStatus::Active);
        assert_eq!(draft.description, "primary");
    }

    #[test]
    fn name_rules() {
        let v = Validation::new();
        assert!(v.validate_name("a").is_err());
        assert!(v.validate_name(&"x".repeat(256)).is_err());
        assert!(v.validate_name("web;rm").is_err());
        assert!(v.validate_name("web 01").is_ok());
    }

    #[test]
    fn host_accepts_ips_and_hostnames() {
        let v = Validation::new();
        assert!(v.validate_host("10.1.2.3").is_ok());
        assert!(v.validate_host("::1").is_ok());
        assert!(v.validate_host("db.internal").is_ok());
        assert!(v.validate_host("-bad-.example").is_err());
        assert!(v.validate_host("").is_err());
    }

    #[test]
    fn port_range_is_enforced() {
        let v = Validation::new();
        assert!(v.validate_port(0).is_err());
        assert!(v.validate_port(65_536).is_err());
        assert_eq!(v.validate_port(65_535).unwrap(), 65_535);
    }

    #[test]
    fn exactly_one_credential_on_create() {
        let v = Validation::new();
        let mut both = request();
        both.ssh_private_key_path = Some("/keys/id_ed25519".to_string());
        assert!(v.validate_create(&both).is_err());

        let mut neither = request();
        neither.ssh_password = Some(String::new());
        assert!(v.validate_create(&neither).is_err());

        let mut key_only = request();
        key_only.ssh_password = None;
        key_only.ssh_private_key_path = Some("/keys/deploy.pem".to_string());
        assert!(v.validate_create(&key_only).is_ok());
    }

    #[test]
    fn private_key_path_must_be_absolute_with_known_extension() {
        let v = Validation::new();
        assert!(v.validate_private_key_path("keys/id.pem").is_err());
        assert!(v.validate_private_key_path("/keys/id.txt").is_err());
        assert!(v.validate_private_key_path("/keys/id_rsa").is_ok());
        assert!(v.validate_private_key_path("/keys/id.PPK").is_ok());
    }

    #[test]
    fn explicit_status_on_create_is_checked() {
        let v = Validation::new();
        let mut req = request();
        req.status = Some("maintenance".to_string());
        assert_eq!(
            v.validate_create(&req).unwrap().status,
            ServerStatus::Maintenance
        );
        req.status = Some("broken".to_string());
        assert!(v.validate_create(&req).is_err());
    }

    #[test]
    fn ids_must_be_uuids() {
        let v = Validation::new();
        assert!(v.validate_id("", "server id").is_err());
        assert!(v.validate_id("not-a-uuid", "server id").is_err());
        assert!(v
            .validate_id(&Uuid::new_v4().to_string(), "server id")
            .is_ok());
    }
}
