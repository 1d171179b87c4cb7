//! # Sync Configuration
//!
//! Configuration management for the sync engine. Built once at process
//! start and passed into constructors; nothing below this module reads the
//! environment.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KSEF_ENVIRONMENT=prod                                              │
//! │     KSEF_PROTOCOL_VERSION=v2                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     $KSEF_CONFIG, or                                                   │
//! │     ~/.config/ksef-sync/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/pl.ksef.ksef-sync/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     test environment, protocol v1, 30 s timeout, page size 100         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [ksef]
//! environment = "test"          # test | demo | production
//! protocol_version = "v1"       # v1 | v2
//! # base_url = "https://ksef-test.mf.gov.pl/api"
//! # public_key_path = "/etc/ksef/ksef-test-public-key.pem"
//!
//! [http]
//! timeout_secs = 30
//! # proxy_url = "http://proxy.local:3128"
//!
//! [query]
//! page_size = 100
//! initial_lookback_hours = 24
//! no_results_codes = [21164]
//!
//! [schedule]
//! interval_secs = 900
//! ```
//!
//! Credentials never live in this file; they come from `KSEF_TAX_ID` and
//! `KSEF_TOKEN`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use ksef_core::{Credential, Environment, ProtocolVersion, PublicKey};

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "KSEF_CONFIG";
/// Env var carrying the tax id (NIP).
pub const TAX_ID_ENV: &str = "KSEF_TAX_ID";
/// Env var carrying the authorization token.
pub const TOKEN_ENV: &str = "KSEF_TOKEN";

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const MIN_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

// =============================================================================
// KSeF Endpoint Settings
// =============================================================================

/// Which KSeF deployment to talk to, and how.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KsefSettings {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Overrides the environment's base endpoint.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Overrides the environment's key file.
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,

    /// Directory holding `ksef-<env>-public-key.pem` files.
    #[serde(default)]
    pub keys_dir: Option<PathBuf>,
}

// =============================================================================
// HTTP Settings
// =============================================================================

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Per-call timeout in seconds (1..=300).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Explicit proxy. Without one, no ambient proxy settings are used.
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Headers sent with every request.
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "User-Agent".to_string(),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0 Safari/537.36"
                .to_string(),
        ),
        ("Accept".to_string(), "application/json".to_string()),
        (
            "Accept-Language".to_string(),
            "pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
        ),
    ])
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            timeout_secs: default_timeout_secs(),
            proxy_url: None,
            headers: default_headers(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Query Settings
// =============================================================================

/// Invoice query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    /// Fixed page size (10..=100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Window start used when no watermark is stored yet.
    #[serde(default = "default_lookback_hours")]
    pub initial_lookback_hours: i64,

    /// Exception codes meaning "the query matched nothing".
    #[serde(default = "default_no_results_codes")]
    pub no_results_codes: Vec<i64>,

    /// `sync_state` key of the watermark.
    #[serde(default = "default_watermark_key")]
    pub watermark_key: String,
}

fn default_page_size() -> u32 {
    100
}

fn default_lookback_hours() -> i64 {
    ksef_core::DEFAULT_LOOKBACK_HOURS
}

fn default_no_results_codes() -> Vec<i64> {
    vec![21164]
}

fn default_watermark_key() -> String {
    "invoice_sync.last_synced_at".to_string()
}

impl Default for QuerySettings {
    fn default() -> Self {
        QuerySettings {
            page_size: default_page_size(),
            initial_lookback_hours: default_lookback_hours(),
            no_results_codes: default_no_results_codes(),
            watermark_key: default_watermark_key(),
        }
    }
}

impl QuerySettings {
    pub fn initial_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.initial_lookback_hours)
    }
}

// =============================================================================
// Auth Settings
// =============================================================================

/// Login handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// v2 only: how many times to poll the authentication status.
    #[serde(default = "default_poll_attempts")]
    pub status_poll_attempts: u32,

    /// v2 only: delay between status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub status_poll_interval_ms: u64,

    /// Close the session after fetching.
    #[serde(default = "default_true")]
    pub terminate_session: bool,
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            status_poll_attempts: default_poll_attempts(),
            status_poll_interval_ms: default_poll_interval_ms(),
            terminate_session: true,
        }
    }
}

impl AuthSettings {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

// =============================================================================
// Database / Schedule Settings
// =============================================================================

/// Local database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Watch-mode schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Give up retrying a failed tick after this many seconds.
    #[serde(default = "default_max_retry_elapsed_secs")]
    pub max_retry_elapsed_secs: u64,

    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound of a single retry delay in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_interval_secs() -> u64 {
    900
}

fn default_max_retry_elapsed_secs() -> u64 {
    300
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            interval_secs: default_interval_secs(),
            max_retry_elapsed_secs: default_max_retry_elapsed_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub ksef: KsefSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub query: QuerySettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, `$KSEF_CONFIG`, or the platform default)
    /// 3. Environment variables
    ///
    /// An explicitly named file that doesn't exist is an error; a missing
    /// default file is not.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let explicit = config_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        let mut config = Self::default();

        match explicit {
            Some(path) => {
                info!(?path, "Loading sync config from file");
                config = Self::from_toml(&std::fs::read_to_string(&path)?)?;
            }
            None => {
                if let Some(path) = Self::default_config_path() {
                    if path.exists() {
                        info!(?path, "Loading sync config from file");
                        config = Self::from_toml(&std::fs::read_to_string(&path)?)?;
                    } else {
                        debug!(?path, "Config file not found, using defaults");
                    }
                }
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.http.timeout_secs) {
            return Err(SyncError::InvalidConfig(format!(
                "http.timeout_secs must be between {} and {}, got {}",
                MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS, self.http.timeout_secs
            )));
        }

        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.query.page_size) {
            return Err(SyncError::InvalidConfig(format!(
                "query.page_size must be between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.query.page_size
            )));
        }

        if self.query.initial_lookback_hours <= 0 {
            return Err(SyncError::InvalidConfig(
                "query.initial_lookback_hours must be positive".into(),
            ));
        }

        if self.query.watermark_key.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "query.watermark_key must not be empty".into(),
            ));
        }

        if self.auth.status_poll_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "auth.status_poll_attempts must be greater than 0".into(),
            ));
        }

        if self.schedule.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "schedule.interval_secs must be greater than 0".into(),
            ));
        }

        self.base_url()?;

        if let Some(ref proxy) = self.http.proxy_url {
            Url::parse(proxy)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> SyncResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`.
    ///
    /// An unparseable `KSEF_ENVIRONMENT` or `KSEF_PROTOCOL_VERSION` is an
    /// error: both pick the endpoint and key. Other unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> SyncResult<()> {
        if let Some(env) = lookup("KSEF_ENVIRONMENT") {
            self.ksef.environment = env
                .parse::<Environment>()
                .map_err(|e| SyncError::InvalidConfig(format!("KSEF_ENVIRONMENT: {}", e)))?;
            debug!(
                environment = %self.ksef.environment,
                "Overriding environment from environment"
            );
        }

        if let Some(version) = lookup("KSEF_PROTOCOL_VERSION") {
            self.ksef.protocol_version = version
                .parse::<ProtocolVersion>()
                .map_err(|e| SyncError::InvalidConfig(format!("KSEF_PROTOCOL_VERSION: {}", e)))?;
        }

        if let Some(url) = lookup("KSEF_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.ksef.base_url = Some(url);
        }

        if let Some(path) = lookup("KSEF_PUBLIC_KEY_PATH") {
            self.ksef.public_key_path = Some(PathBuf::from(path));
        }

        if let Some(dir) = lookup("KSEF_KEYS_DIR") {
            self.ksef.keys_dir = Some(PathBuf::from(dir));
        }

        if let Some(proxy) = lookup("KSEF_PROXY_URL") {
            self.http.proxy_url = Some(proxy);
        }

        if let Some(timeout) = lookup("KSEF_HTTP_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.http.timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "Ignoring KSEF_HTTP_TIMEOUT_SECS"),
            }
        }

        if let Some(size) = lookup("KSEF_PAGE_SIZE") {
            match size.parse::<u32>() {
                Ok(page_size) => self.query.page_size = page_size,
                Err(_) => warn!(value = %size, "Ignoring KSEF_PAGE_SIZE"),
            }
        }

        if let Some(path) = lookup("KSEF_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        Ok(())
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Resolved Values
    // =========================================================================

    /// Base endpoint: the override, else the environment's.
    pub fn base_url(&self) -> SyncResult<Url> {
        let raw = self
            .ksef
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.ksef.environment.base_url());
        let url = Url::parse(raw)?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SyncError::InvalidUrl(format!(
                "base URL must be http or https, got {}",
                other
            ))),
        }
    }

    /// Path of the public key file to load.
    pub fn public_key_path(&self) -> SyncResult<PathBuf> {
        if let Some(ref path) = self.ksef.public_key_path {
            return Ok(path.clone());
        }

        let dir = self
            .ksef
            .keys_dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.config_dir().join("keys")))
            .ok_or_else(|| {
                SyncError::ConfigLoadFailed("No keys directory available".into())
            })?;

        Ok(dir.join(self.ksef.environment.public_key_file()))
    }

    /// Reads and parses the environment public key.
    pub fn load_public_key(&self) -> SyncResult<PublicKey> {
        let path = self.public_key_path()?;
        let pem = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;
        let key = PublicKey::from_pem(&pem)?;

        info!(path = %path.display(), bits = key.bits(), "Public key loaded");
        Ok(key)
    }

    /// SQLite file path.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("ksef-sync.db"))
                .unwrap_or_else(|| PathBuf::from("ksef-sync.db"))
        })
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("pl", "ksef", "ksef-sync")
}

/// Reads the credential from `KSEF_TAX_ID` and `KSEF_TOKEN`.
pub fn credential_from_env() -> SyncResult<Credential> {
    credential_from(|name| std::env::var(name).ok())
}

fn credential_from(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Credential> {
    let tax_id = lookup(TAX_ID_ENV)
        .ok_or_else(|| SyncError::ConfigLoadFailed(format!("{} is not set", TAX_ID_ENV)))?;
    let token = lookup(TOKEN_ENV)
        .ok_or_else(|| SyncError::ConfigLoadFailed(format!("{} is not set", TOKEN_ENV)))?;

    Ok(Credential::new(&tax_id, token)?)
}
