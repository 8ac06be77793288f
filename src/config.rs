use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub model_runtime: ModelRuntimeConfig,
    pub internal: InternalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Shared filesystem layout root. Both nodes mount the same path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mount_path: String,
}

/// GPU worker location, consumed by the orchestrator only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub host: String,
    pub http_port: u16,
}

/// Local model server, consumed by the worker only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelRuntimeConfig {
    pub url: String,
    pub default_num_ctx: u32,
    /// Template selection policy: "sector_classified" or "single_template".
    pub template_policy: String,
}

/// Node-to-node callback settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    /// Shared secret expected in the X-Internal-Secret header.
    pub shared_secret: String,
    /// Orchestrator address the worker calls back to.
    pub orchestrator_url: String,
    /// UI polling hint, exposed by the orchestrator but not consumed by it.
    pub batch_poll_interval_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "deckard")]
#[command(version, about = "Deckard - Healthcare Pitch Deck Review Pipeline")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Shared filesystem mount path (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub storage_root: Option<String>,

    /// Model runtime URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub model_runtime_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,deckard=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Recognized environment variables:
    /// - SHARED_FILESYSTEM_MOUNT_PATH: root of shared storage (required)
    /// - DATABASE_URL: relational store connection string (required, both nodes)
    /// - GPU_INSTANCE_HOST / GPU_HTTP_PORT: worker location (orchestrator only)
    /// - MODEL_RUNTIME_URL: local model server (worker only)
    /// - DEFAULT_NUM_CTX: default context window (default 32768)
    /// - BATCH_POLL_INTERVAL_S: UI hint exposed by the orchestrator
    /// - INTERNAL_SHARED_SECRET: callback auth header value
    /// - ORCHESTRATOR_URL: callback target for the worker
    /// - APP_SERVER_HOST / APP_SERVER_PORT / APP_LOG_LEVEL: node basics
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SHARED_FILESYSTEM_MOUNT_PATH") {
            self.storage.mount_path = path;
            tracing::info!("Override storage.mount_path from env: {}", self.storage.mount_path);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            self.database.url = db_url;
            tracing::info!("Override database.url from env");
        }

        if let Ok(host) = std::env::var("GPU_INSTANCE_HOST") {
            self.worker.host = host;
            tracing::info!("Override worker.host from env: {}", self.worker.host);
        }

        if let Ok(port) = std::env::var("GPU_HTTP_PORT") {
            match port.parse() {
                Ok(port) => {
                    self.worker.http_port = port;
                    tracing::info!("Override worker.http_port from env: {}", self.worker.http_port);
                },
                Err(_) => tracing::warn!("Invalid GPU_HTTP_PORT '{}', ignoring", port),
            }
        }

        if let Ok(url) = std::env::var("MODEL_RUNTIME_URL") {
            self.model_runtime.url = url;
            tracing::info!("Override model_runtime.url from env: {}", self.model_runtime.url);
        }

        if let Ok(num_ctx) = std::env::var("DEFAULT_NUM_CTX") {
            match num_ctx.parse() {
                Ok(v) => {
                    self.model_runtime.default_num_ctx = v;
                    tracing::info!("Override model_runtime.default_num_ctx from env: {}", v);
                },
                Err(_) => tracing::warn!("Invalid DEFAULT_NUM_CTX '{}', ignoring", num_ctx),
            }
        }

        if let Ok(interval) = std::env::var("BATCH_POLL_INTERVAL_S") {
            match interval.parse() {
                Ok(v) => self.internal.batch_poll_interval_s = v,
                Err(_) => tracing::warn!("Invalid BATCH_POLL_INTERVAL_S '{}', ignoring", interval),
            }
        }

        if let Ok(secret) = std::env::var("INTERNAL_SHARED_SECRET") {
            self.internal.shared_secret = secret;
            tracing::info!("Override internal.shared_secret from env");
        }

        if let Ok(url) = std::env::var("ORCHESTRATOR_URL") {
            self.internal.orchestrator_url = url;
            tracing::info!(
                "Override internal.orchestrator_url from env: {}",
                self.internal.orchestrator_url
            );
        }

        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
        }

        if let Some(db_url) = &args.database_url {
            self.database.url = db_url.clone();
        }

        if let Some(root) = &args.storage_root {
            self.storage.mount_path = root.clone();
        }

        if let Some(url) = &args.model_runtime_url {
            self.model_runtime.url = url.clone();
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.internal.shared_secret == "dev-internal-secret-change-in-production" {
            tracing::warn!("Using default internal shared secret; set INTERNAL_SHARED_SECRET");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.storage.mount_path.is_empty() {
            anyhow::bail!("Shared filesystem mount path cannot be empty");
        }

        if self.model_runtime.default_num_ctx == 0 {
            anyhow::bail!("model_runtime.default_num_ctx must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Base URL of the worker node, orchestrator side.
    pub fn worker_base_url(&self) -> String {
        format!("http://{}:{}", self.worker.host, self.worker.http_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/deckard.db".to_string() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { mount_path: "/mnt/shared".to_string() }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), http_port: 8001 }
    }
}

impl Default for ModelRuntimeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:11434".to_string(),
            default_num_ctx: 32768,
            template_policy: "sector_classified".to_string(),
        }
    }
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            shared_secret: "dev-internal-secret-change-in-production".to_string(),
            orchestrator_url: "http://127.0.0.1:8000".to_string(),
            batch_poll_interval_s: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,deckard=debug".to_string(), file: Some("logs/deckard.log".to_string()) }
    }
}
