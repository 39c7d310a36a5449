pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_EXEC_DEFAULT_MS: u64 = 45_000;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
    pub const POLL_INTERVAL_MS: u64 = 5;
    pub const ENGINE_TIMEOUT_SECS: u64 = 120;
    pub const ENGINE_DIAL_COMMAND: &str = "docker system dial-stdio";
    pub const ENGINE_CHANNEL_OPEN_TIMEOUT_MS: u32 = 10_000;
    pub const LOOPBACK: &str = "127.0.0.1";
}

pub mod storage {
    pub const POOL_CONNECT_TIMEOUT_MS: u64 = 5_000;
}

pub mod limits {
    pub const MAX_PORT: u16 = 65_535;
    pub const MIN_PORT: u16 = 1;
    pub const NAME_MIN_LEN: usize = 2;
    pub const NAME_MAX_LEN: usize = 255;
    pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
    pub const IO_CHUNK_BYTES: usize = 16 * 1024;
}

pub mod pagination {
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 100;
}

pub mod platform {
    pub const DEFAULT_PROTECTED_NAME: &str = "hostctl";
    pub const DEFAULT_DATABASE_URL: &str = "sqlite://hostctl.db";
    pub const DEFAULT_SSH_HOST: &str = "127.0.0.1";
    pub const DEFAULT_SSH_USER: &str = "root";
    pub const DEFAULT_DB_POOL_SIZE: u32 = 10;
}

pub mod private_key {
    pub const ALLOWED_EXTENSIONS: &[&str] = &["pem", "key", "ppk"];
}
