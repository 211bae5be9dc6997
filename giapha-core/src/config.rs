use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct GiaphaConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub branches: Vec<BranchConfig>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub backend: GatewayBackend,
    pub notify_channel: String,
    pub reconnect_attempts: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: GatewayBackend::Postgres,
            notify_channel: "giapha_people".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 500,
        }
    }
}

/// One partition of the family graph. Declaration order is merge order.
#[derive(Debug, Deserialize, Clone)]
pub struct BranchConfig {
    pub key: String,
    pub label: String,
    pub seed_path: String,
    /// Literal prefix for identifiers minted in this branch.
    #[serde(default)]
    pub id_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub check_in_limit: usize,
    pub seed_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            check_in_limit: 5,
            seed_chunk_size: 499,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MaintenanceConfig {
    #[serde(default)]
    pub cleanup_on_start: bool,
    /// Zero disables the periodic cleanup.
    #[serde(default)]
    pub cleanup_interval_minutes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

impl GiaphaConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Key of the branch selected at start-up.
    pub fn default_branch_key(&self) -> Option<&str> {
        self.default_branch
            .as_deref()
            .or_else(|| self.branches.first().map(|b| b.key.as_str()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.branches.is_empty() {
            return Err(ConfigError::Message(
                "at least one [[branches]] entry is required".to_string(),
            ));
        }
        for (i, branch) in self.branches.iter().enumerate() {
            if self.branches[..i].iter().any(|b| b.key == branch.key) {
                return Err(ConfigError::Message(format!(
                    "duplicate branch key '{}'",
                    branch.key
                )));
            }
        }
        if let Some(key) = self.default_branch.as_deref() {
            if !self.branches.iter().any(|b| b.key == key) {
                return Err(ConfigError::Message(format!(
                    "default_branch '{key}' is not a configured branch"
                )));
            }
        }
        Ok(())
    }
}
