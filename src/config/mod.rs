pub mod host;
pub mod tls;

pub use host::*;
pub use tls::*;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DockerError;

pub const DEFAULT_API_VERSION: &str = "1.41";
pub const MINIMUM_API_VERSION: &str = "1.24";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;
pub const DEFAULT_DIAL_STDIO_COMMAND: &str = "docker system dial-stdio";
pub const DEFAULT_USER_AGENT: &str = concat!("dockwire/", env!("CARGO_PKG_VERSION"));

/// Which API version to speak to the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiVersion {
    /// Ask the daemon (`GET /version`) when the client is created
    Auto,
    /// Use a fixed version, e.g. `"1.41"`
    Fixed(String),
}

impl Default for ApiVersion {
    fn default() -> Self {
        ApiVersion::Fixed(DEFAULT_API_VERSION.to_string())
    }
}

/// How `ssh://` hosts are reached
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SshMode {
    /// One `ssh` process per connection
    #[default]
    Subprocess,
    /// Connections multiplexed over one authenticated OpenSSH control master
    SharedSession,
}

/// Settings for a [`Client`](crate::Client)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the daemon, see [`parse_host`](crate::parser::host::parse_host)
    pub host: String,
    pub api_version: ApiVersion,
    /// Deadline for buffered requests
    pub timeout: Duration,
    /// Deadline for establishing a channel and its HTTP handshake
    pub connect_timeout: Duration,
    /// Maximum number of live connections, idle or in use
    pub max_pool_size: usize,
    /// Wait for a free slot instead of failing when the pool is full
    pub pool_block: bool,
    /// How long to wait for a free slot when `pool_block` is set
    pub pool_timeout: Duration,
    /// Deadline for each read of a streaming body, `None` waits forever
    pub stream_read_timeout: Option<Duration>,
    pub tls: Option<TlsConfig>,
    pub ssh_mode: SshMode,
    /// Remote command run over SSH, split with shell quoting rules
    pub ssh_command: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_version: ApiVersion::default(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            pool_block: true,
            pool_timeout: DEFAULT_TIMEOUT,
            stream_read_timeout: None,
            tls: None,
            ssh_mode: SshMode::default(),
            ssh_command: DEFAULT_DIAL_STDIO_COMMAND.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Build a config from `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`
    ///
    /// # Errors
    ///
    /// TLS is enabled but the certificate files are missing
    pub fn from_env() -> Result<Self, DockerError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&env)
    }

    /// Same as [`ClientConfig::from_env`], reading from the provided map
    ///
    /// An empty `DOCKER_TLS_VERIFY` counts as disabled, any other value enables it.
    /// Setting either variable enables TLS, in which case `tcp://` hosts become `https://`.
    ///
    /// # Errors
    ///
    /// TLS is enabled but the certificate files are missing
    pub fn from_env_map(env: &HashMap<String, String>) -> Result<Self, DockerError> {
        let host = env.get("DOCKER_HOST").cloned().unwrap_or_default();
        let cert_path = env
            .get("DOCKER_CERT_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let tls_verify = env.get("DOCKER_TLS_VERIFY").is_some_and(|v| !v.is_empty());
        let enable_tls = cert_path.is_some() || tls_verify;

        let mut config = Self::default();
        if !enable_tls {
            config.host = host;
            return Ok(config);
        }

        config.host = host.replacen("tcp://", "https://", 1);

        let cert_path = cert_path.unwrap_or_else(|| {
            let home = env.get("HOME").map_or(".", String::as_str);
            PathBuf::from(home).join(".docker")
        });

        log::debug!("Loading TLS material from {}", cert_path.display());
        let tls = TlsConfig::new(
            Some((cert_path.join("cert.pem"), cert_path.join("key.pem"))),
            Some(cert_path.join("ca.pem")),
            tls_verify,
        )?;
        config.tls = Some(tls);

        Ok(config)
    }

    #[must_use]
    pub fn api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = version;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    #[must_use]
    pub fn pool_block(mut self, block: bool) -> Self {
        self.pool_block = block;
        self
    }

    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    #[must_use]
    pub fn stream_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    #[must_use]
    pub fn ssh_mode(mut self, mode: SshMode) -> Self {
        self.ssh_mode = mode;
        self
    }
}
