use serde::Deserialize;

/// Root application configuration. Loaded from an optional `config/cohort.toml`
/// file and environment variables with the prefix `COHORT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Limits applied to membership requests before they reach storage.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    /// Largest accepted TTL. Zero or negative TTLs mean "never expires".
    #[serde(default = "default_max_ttl_days")]
    pub max_ttl_days: i64,
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,
    #[serde(default = "default_max_slug_len")]
    pub max_slug_len: usize,
}

/// Where monthly history exports are written and how they are linked.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: String,
    #[serde(default = "default_link_prefix")]
    pub link_prefix: String,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_max_ttl_days() -> i64 {
    366
}
fn default_max_batch_items() -> usize {
    100
}
fn default_max_slug_len() -> usize {
    100
}
fn default_export_dir() -> String {
    "./history".to_string()
}
fn default_link_prefix() -> String {
    "/api/v1/history/files".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            max_ttl_days: default_max_ttl_days(),
            max_batch_items: default_max_batch_items(),
            max_slug_len: default_max_slug_len(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            link_prefix: default_link_prefix(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            membership: MembershipConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/cohort.toml` (if present) overlaid
    /// with `COHORT__*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/cohort").required(false))
            .add_source(
                config::Environment::with_prefix("COHORT")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
