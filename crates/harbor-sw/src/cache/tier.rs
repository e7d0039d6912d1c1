//! Logical tiers and the generation-tagged cache names that back them.

use crate::config::WorkerConfig;

/// A named partition of the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Seeded entry points and cache-first assets.
    Static,
    /// Navigations mirrored by the page strategy.
    Runtime,
    /// Network-first API responses.
    Api,
    /// Cache-first images.
    Images,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Static, Tier::Runtime, Tier::Api, Tier::Images];

    pub fn label(self) -> &'static str {
        match self {
            Tier::Static => "static",
            Tier::Runtime => "runtime",
            Tier::Api => "api",
            Tier::Images => "images",
        }
    }

    /// Entry cap for this tier; `None` when uncapped.
    pub fn capacity(self, config: &WorkerConfig) -> Option<usize> {
        let caps = &config.capacities;
        match self {
            Tier::Static => caps.static_assets,
            Tier::Runtime => Some(caps.runtime),
            Tier::Api => Some(caps.api),
            Tier::Images => Some(caps.images),
        }
    }
}

/// One version's set of cache names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    prefix: String,
    version: String,
}

impl Generation {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `<prefix>-<tier>-<version>`
    pub fn cache_name(&self, tier: Tier) -> String {
        format!("{}-{}-{}", self.prefix, tier.label(), self.version)
    }

    pub fn cache_names(&self) -> Vec<String> {
        Tier::ALL.iter().map(|t| self.cache_name(*t)).collect()
    }

    /// Whether a stored cache name belongs to this generation.
    pub fn owns(&self, cache_name: &str) -> bool {
        Tier::ALL.iter().any(|t| self.cache_name(*t) == cache_name)
    }
}
