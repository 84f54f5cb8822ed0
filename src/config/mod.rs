use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{AicmError, AicmResult};
use crate::modules::delivery::DeliveryType;
use crate::modules::limits::LimitDecodePolicy;
use crate::modules::store::IniStore;

/// Name every SDK request reports in its `User-Agent` header.
pub const USER_AGENT: &str = "aicostmanager-rust";
/// Default ingestion host.
pub const DEFAULT_API_BASE: &str = "https://aicostmanager.com";
/// Default API prefix appended to the base.
pub const DEFAULT_API_URL: &str = "/api/v1";
/// Default location of the durable delivery queue database.
const DEFAULT_DB_RELATIVE_PATH: &str = ".cache/aicostmanager/delivery_queue.db";

/// Tracker configuration resolved from explicit values, the shared INI file
/// and environment variables.
///
/// Precedence: values set on this struct by the caller win over INI
/// `[tracker]` options, which win over `AICM_*` environment variables, which
/// win over built-in defaults.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_key: String,
    pub api_base: String,
    pub api_url: String,
    pub ini_path: PathBuf,
    /// Delivery strategy; `None` falls back to `[tracker] delivery_manager`
    /// in the INI file, then to immediate.
    pub delivery_type: Option<DeliveryType>,
    /// Durable queue location; `None` falls back to `[delivery] db_path`,
    /// then `AICM_DELIVERY_DB_PATH`, then the per-user default.
    pub db_path: Option<PathBuf>,
    /// Credential identifier used by the limit pre-check. Defaults to the
    /// API key itself.
    pub api_key_id: Option<String>,
    pub limit_policy: LimitDecodePolicy,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub batch_interval: Duration,
    /// Age after which an orphaned `processing` row is requeued at startup.
    pub reclaim_threshold: Duration,
    pub max_attempts: u32,
    pub max_retries: u32,
    pub queue_size: usize,
    pub max_batch_size: usize,
    pub log_bodies: bool,
}

impl TrackerConfig {
    /// Build a configuration with built-in defaults and an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_owned(),
            api_url: DEFAULT_API_URL.to_owned(),
            ini_path: IniStore::resolve_path(None),
            delivery_type: None,
            db_path: None,
            api_key_id: None,
            limit_policy: LimitDecodePolicy::FailOpen,
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            batch_interval: Duration::from_millis(500),
            reclaim_threshold: Duration::from_secs(300),
            max_attempts: 3,
            max_retries: 5,
            queue_size: 10_000,
            max_batch_size: 1_000,
            log_bodies: false,
        }
    }

    /// Load configuration from the environment and the shared INI file.
    ///
    /// `AICM_API_KEY` is required. `.env` files are honored. The remaining
    /// options come from `[tracker]` in the INI file with environment
    /// fallbacks.
    pub fn from_env() -> AicmResult<Self> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("AICM_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                AicmError::missing_configuration(
                    "API key not provided. Set AICM_API_KEY or pass an explicit key",
                )
            })?;

        let ini_path = IniStore::resolve_path(None);
        let ini = IniStore::new(&ini_path);
        let mut config = Self::new(api_key);
        config.ini_path = ini_path;

        config.api_base = resolve(&ini, "api_base", Some("AICM_API_BASE"))?
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        config.api_url = resolve(&ini, "api_url", Some("AICM_API_URL"))?
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());

        if let Some(name) = resolve(&ini, "delivery_manager", None)? {
            config.delivery_type = Some(name.parse()?);
        }
        if let Some(timeout) = resolve_secs(&ini, "timeout")? {
            config.timeout = timeout;
        }
        if let Some(poll) = resolve_secs(&ini, "poll_interval")? {
            config.poll_interval = poll;
        }
        if let Some(batch) = resolve_secs(&ini, "batch_interval")? {
            config.batch_interval = batch;
        }
        if let Some(value) = resolve_parsed::<u32>(&ini, "max_attempts")? {
            config.max_attempts = value;
        }
        if let Some(value) = resolve_parsed::<u32>(&ini, "max_retries")? {
            config.max_retries = value;
        }
        if let Some(value) = resolve_parsed::<usize>(&ini, "queue_size")? {
            config.queue_size = value;
        }
        if let Some(value) = resolve_parsed::<usize>(&ini, "max_batch_size")? {
            config.max_batch_size = value;
        }
        config.log_bodies = resolve(&ini, "log_bodies", Some("AICM_DELIVERY_LOG_BODIES"))?
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        Ok(config)
    }

    /// Fully-qualified ingestion endpoint for the `/track` route.
    pub fn track_endpoint(&self) -> String {
        format!(
            "{}{}/track",
            self.api_base.trim_end_matches('/'),
            self.api_url.trim_end_matches('/')
        )
    }

    /// Combined API root used by the REST client.
    pub fn api_root(&self) -> String {
        format!(
            "{}{}",
            self.api_base.trim_end_matches('/'),
            self.api_url.trim_end_matches('/')
        )
    }

    /// Credential identifier the pre-check filters triggered limits by.
    pub fn effective_api_key_id(&self) -> &str {
        self.api_key_id.as_deref().unwrap_or(&self.api_key)
    }

    /// Resolve the durable queue path: explicit, INI, env, default.
    pub fn resolve_db_path(&self, ini: &IniStore) -> AicmResult<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        if let Some(path) = ini.get("delivery", "db_path")? {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("AICM_DELIVERY_DB_PATH") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(home.join(DEFAULT_DB_RELATIVE_PATH))
    }
}

/// `[tracker]` option with optional environment fallback.
fn resolve(ini: &IniStore, key: &str, env: Option<&str>) -> AicmResult<Option<String>> {
    if let Some(value) = ini.get("tracker", key)? {
        if !value.is_empty() {
            return Ok(Some(value));
        }
    }
    if let Some(name) = env {
        if let Ok(value) = std::env::var(name) {
            if !value.is_empty() {
                return Ok(Some(value));
            }
        }
    }
    Ok(None)
}

fn resolve_secs(ini: &IniStore, key: &str) -> AicmResult<Option<Duration>> {
    Ok(resolve(ini, key, None)?
        .and_then(|value| value.parse::<f64>().ok())
        .map(Duration::from_secs_f64))
}

fn resolve_parsed<T: std::str::FromStr>(ini: &IniStore, key: &str) -> AicmResult<Option<T>> {
    Ok(resolve(ini, key, None)?.and_then(|value| value.parse::<T>().ok()))
}

/// Truthy values accepted for boolean options, matching the other SDKs.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
