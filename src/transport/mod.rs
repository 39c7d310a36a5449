use crate::errors::ToolError;
use crate::services::context::Interrupt;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub mod engine;
pub mod ssh;
pub mod tunnel;

pub use engine::{BollardEngineFactory, ContainerEngine, ContainerInfo, EngineFactory};
pub use ssh::Ssh2Transport;
pub use tunnel::EngineBridge;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl SshEndpoint {
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            return format!("[{}]:{}", self.host, self.port);
        }
        format!("{}:{}", self.host, self.port)
    }
}

/// One way of proving identity to the remote host.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    PrivateKeyFile {
        path: String,
        passphrase: Option<String>,
    },
    PrivateKeyMemory {
        pem: String,
        passphrase: Option<String>,
    },
    Password(String),
}

impl SshAuth {
    pub fn method(&self) -> &'static str {
        match self {
            SshAuth::PrivateKeyFile { .. } | SshAuth::PrivateKeyMemory { .. } => "private_key",
            SshAuth::Password(_) => "password",
        }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::PrivateKeyFile { path, .. } => {
                f.debug_struct("PrivateKeyFile").field("path", path).finish()
            }
            SshAuth::PrivateKeyMemory { .. } => f.write_str("PrivateKeyMemory"),
            SshAuth::Password(_) => f.write_str("Password"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated SSH session. All methods block.
pub trait RemoteSession: Send {
    fn exec(
        &mut self,
        command: &str,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<CommandOutput, ToolError>;

    fn close(&mut self);

    /// Turns the session into a loopback endpoint that speaks to the remote
    /// container engine.
    fn into_engine_bridge(self: Box<Self>) -> Result<EngineBridge, ToolError>;
}

/// Dials and authenticates SSH sessions. Blocking; callers run it through
/// `ExecutionContext::run_blocking`.
pub trait SshTransport: Send + Sync {
    fn connect(
        &self,
        endpoint: &SshEndpoint,
        auth: &SshAuth,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn RemoteSession>, ToolError>;
}
