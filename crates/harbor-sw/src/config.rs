//! Background process configuration

use std::path::Path;

use harbor_common::HarborError;
use harbor_net::UrlPattern;
use serde::{Deserialize, Serialize};

/// Background process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of every cache name owned by this process
    pub cache_prefix: String,

    /// Generation tag embedded in cache names
    pub cache_version: String,

    /// Per-tier entry caps
    pub capacities: TierCapacities,

    /// Origin-relative paths stored in the static tier on install
    pub seed_paths: Vec<String>,

    /// Extensions served cache-first
    pub static_extensions: Vec<String>,

    /// Path substrings served network-first into the API tier
    pub api_patterns: Vec<String>,

    /// Route used when a navigation has no snapshot of its own
    pub root_route: String,

    /// Offline bodies for synthetic 503 responses
    pub offline: OfflineMessages,

    /// Registration settings
    pub registration: RegistrationConfig,

    /// Notification rendering defaults
    pub notifications: NotificationDefaults,

    /// Total body bytes the cache store may hold
    pub storage_quota_bytes: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCapacities {
    /// `None` leaves the static tier uncapped
    pub static_assets: Option<usize>,
    pub runtime: usize,
    pub api: usize,
    pub images: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineMessages {
    pub asset: String,
    pub api: String,
    pub page: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub script_path: String,
    pub scope: String,
    /// How often the page re-checks for a new script, in seconds
    pub update_check_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,

    /// Fall back to substring matching when no window URL equals the target
    pub click_contains_fallback: bool,

    /// Displayed notifications older than this are dropped by `expire`
    pub timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "harbor".to_string(),
            cache_version: "v1".to_string(),
            capacities: TierCapacities::default(),
            seed_paths: ["/", "/index.html", "/manifest.json", "/offline.html"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            static_extensions: [
                "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff",
                "woff2", "ttf", "otf", "eot",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_patterns: ["/api/", "/rest/v1/", "/auth/v1/", "/functions/v1/"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            root_route: "/".to_string(),
            offline: OfflineMessages::default(),
            registration: RegistrationConfig::default(),
            notifications: NotificationDefaults::default(),
            storage_quota_bytes: None,
        }
    }
}

impl Default for TierCapacities {
    fn default() -> Self {
        Self {
            static_assets: None,
            runtime: 50,
            api: 100,
            images: 60,
        }
    }
}

impl Default for OfflineMessages {
    fn default() -> Self {
        Self {
            asset: "Offline - Resource not available".to_string(),
            api: "Offline - API not available".to_string(),
            page: "Offline - Page not available".to_string(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            script_path: "/sw.js".to_string(),
            scope: "/".to_string(),
            update_check_interval_secs: 3600,
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "New Notification".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![200, 100, 200],
            tag: "default".to_string(),
            click_contains_fallback: true,
            timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON document; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, HarborError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HarborError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarborError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), HarborError> {
        if self.cache_prefix.is_empty() || self.cache_version.is_empty() {
            return Err(HarborError::config("cache prefix and version must be set"));
        }
        let caps = &self.capacities;
        if caps.runtime == 0 || caps.api == 0 || caps.images == 0 || caps.static_assets == Some(0)
        {
            return Err(HarborError::config("tier capacities must be positive"));
        }
        fn relative(path: &str) -> bool {
            !path.starts_with('/')
        }
        if let Some(path) = self.seed_paths.iter().find(|p| relative(p.as_str())) {
            return Err(HarborError::config(format!(
                "seed path must be origin-relative: {path}"
            )));
        }
        if relative(&self.root_route)
            || relative(&self.registration.script_path)
            || relative(&self.registration.scope)
        {
            return Err(HarborError::config(
                "root route, script path and scope must start with '/'",
            ));
        }
        Ok(())
    }

    pub(crate) fn static_patterns(&self) -> Vec<UrlPattern> {
        self.static_extensions
            .iter()
            .map(|ext| UrlPattern::extension(ext))
            .collect()
    }

    pub(crate) fn api_url_patterns(&self) -> Vec<UrlPattern> {
        self.api_patterns
            .iter()
            .map(|p| UrlPattern::contains(p))
            .collect()
    }
}
