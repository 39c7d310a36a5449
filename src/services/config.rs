use crate::constants::network::{SSH_DEFAULT_PORT, TIMEOUT_SSH_EXEC_DEFAULT_MS, TIMEOUT_SSH_READY_MS};
use crate::constants::platform::{
    DEFAULT_DATABASE_URL, DEFAULT_DB_POOL_SIZE, DEFAULT_PROTECTED_NAME, DEFAULT_SSH_HOST,
    DEFAULT_SSH_USER,
};
use std::fmt;
use std::time::Duration;

/// Administrative SSH login used when an operation is not bound to a server.
#[derive(Clone, Default)]
pub struct SshDefaults {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for SshDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshDefaults")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("private_key_path", &self.private_key_path)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub database_url: String,
    pub ssh: SshDefaults,
    pub connect_timeout: Duration,
    pub exec_timeout: Duration,
    pub protected_name: String,
    pub db_pool_size: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Blank
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| -> Option<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let read_u64 = |key: &str, fallback: u64| -> u64 {
            read(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(fallback)
        };

        let port = read("HOSTCTL_SSH_PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(SSH_DEFAULT_PORT);
        let pool_size = read("HOSTCTL_DB_POOL_SIZE")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_DB_POOL_SIZE);

        Self {
            database_url: read("HOSTCTL_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            ssh: SshDefaults {
                host: read("HOSTCTL_SSH_HOST").unwrap_or_else(|| DEFAULT_SSH_HOST.to_string()),
                port,
                username: read("HOSTCTL_SSH_USER")
                    .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
                password: read("HOSTCTL_SSH_PASSWORD"),
                private_key_path: read("HOSTCTL_SSH_PRIVATE_KEY_PATH"),
                private_key: read("HOSTCTL_SSH_PRIVATE_KEY"),
                passphrase: read("HOSTCTL_SSH_PASSPHRASE"),
            },
            connect_timeout: Duration::from_millis(read_u64(
                "HOSTCTL_SSH_CONNECT_TIMEOUT_MS",
                TIMEOUT_SSH_READY_MS,
            )),
            exec_timeout: Duration::from_millis(read_u64(
                "HOSTCTL_SSH_EXEC_TIMEOUT_MS",
                TIMEOUT_SSH_EXEC_DEFAULT_MS,
            )),
            protected_name: read("HOSTCTL_PROTECTED_NAME")
                .unwrap_or_else(|| DEFAULT_PROTECTED_NAME.to_string()),
            db_pool_size: pool_size,
        }
    }
}
