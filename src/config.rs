//! Process settings.
//!
//! All configuration arrives through the environment and is parsed once at
//! startup into [`Settings`]. Invalid values are rejected with a clear error
//! before the server opens any ports rather than silently falling back.
//!
//! Some variables (`JWT_SECRET`, `ENABLE_SWAGGER`, `ENABLE_JWT_AUTH`,
//! `API_RATE_LIMIT`, `ENABLE_METRICS`, `ENABLE_TRACING`) belong to collaborators
//! outside the routing core. They are parsed here so the whole deployment
//! contract lives in one struct, and surfaced through `/health` config flags,
//! but the core does not enforce them.

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" => Ok(Self::Production),
            other => anyhow::bail!("NODE_ENV must be development|test|production, got `{other}`"),
        }
    }
}

/// Cache participation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// Caching disabled entirely.
    None,
    /// Skip prompts shorter than 50 characters.
    Minimal,
    #[default]
    Default,
    /// Default read semantics with doubled TTL on write.
    Aggressive,
}

impl std::str::FromStr for CacheStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "minimal" => Ok(Self::Minimal),
            "default" => Ok(Self::Default),
            "aggressive" => Ok(Self::Aggressive),
            other => anyhow::bail!("cache strategy must be default|aggressive|minimal|none, got `{other}`"),
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Default => "default",
            Self::Aggressive => "aggressive",
        })
    }
}

/// Everything the process reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub node_env: Environment,

    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    /// Base cache TTL in seconds.
    pub redis_cache_ttl_secs: u64,

    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub lmstudio_url: String,
    pub lmstudio_timeout_ms: u64,

    pub jwt_secret: Option<String>,
    pub log_level: Option<String>,
    pub api_rate_limit: Option<u32>,
    pub api_timeout_ms: u64,

    pub enable_cache: bool,
    pub enable_swagger: bool,
    pub enable_jwt_auth: bool,
    pub enable_dynamic_config: bool,
    pub enable_metrics: bool,
    pub enable_tracing: bool,

    pub cost_optimize: bool,
    pub quality_optimize: bool,
    pub latency_optimize: bool,
    pub fallback_enabled: bool,
    pub chain_enabled: bool,
    pub cache_strategy: CacheStrategy,
    pub auto_degraded_mode: bool,
    pub fallback_levels: u32,
    pub request_timeout_ms: u64,
    pub monitor_fallbacks: bool,

    /// Optional TOML model-catalog seed file.
    pub models_config: Option<PathBuf>,
}

mod defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 3000;
    pub const REDIS_CACHE_TTL_SECS: u64 = 300;
    pub const LMSTUDIO_URL: &str = "http://localhost:1234";
    pub const LMSTUDIO_TIMEOUT_MS: u64 = 60_000;
    pub const API_TIMEOUT_MS: u64 = 30_000;
    pub const FALLBACK_LEVELS: u32 = 2;
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const CREDENTIAL_SECRET: &str = "neuroroute-development-secret";
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through a lookup function (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let parse_u16 = |key: &str, default: u16| -> anyhow::Result<u16> {
            match get(key) {
                Some(v) => v.parse().with_context(|| format!("{key}=`{v}` is not a port")),
                None => Ok(default),
            }
        };
        let parse_u32 = |key: &str, default: u32| -> anyhow::Result<u32> {
            match get(key) {
                Some(v) => v.parse().with_context(|| format!("{key}=`{v}` is not an integer")),
                None => Ok(default),
            }
        };
        let parse_u64 = |key: &str, default: u64| -> anyhow::Result<u64> {
            match get(key) {
                Some(v) => v.parse().with_context(|| format!("{key}=`{v}` is not an integer")),
                None => Ok(default),
            }
        };
        let parse_bool = |key: &str, default: bool| -> anyhow::Result<bool> {
            match get(key).as_deref() {
                None | Some("") => Ok(default),
                Some("true") | Some("1") | Some("yes") | Some("on") => Ok(true),
                Some("false") | Some("0") | Some("no") | Some("off") => Ok(false),
                Some(v) => anyhow::bail!("{key}=`{v}` is not a boolean"),
            }
        };
        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        let node_env = match get("NODE_ENV") {
            Some(v) => v.parse()?,
            None => Environment::Development,
        };
        let cache_strategy = match get("CACHE_STRATEGY") {
            Some(v) => v.parse()?,
            None => CacheStrategy::Default,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| defaults::HOST.to_string()),
            port: parse_u16("PORT", defaults::PORT)?,
            node_env,
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            redis_cache_ttl_secs: parse_u64("REDIS_CACHE_TTL", defaults::REDIS_CACHE_TTL_SECS)?,
            openai_api_key: non_empty("OPENAI_API_KEY"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            lmstudio_url: get("LMSTUDIO_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| defaults::LMSTUDIO_URL.to_string()),
            lmstudio_timeout_ms: parse_u64("LMSTUDIO_TIMEOUT", defaults::LMSTUDIO_TIMEOUT_MS)?,
            jwt_secret: non_empty("JWT_SECRET"),
            log_level: non_empty("LOG_LEVEL"),
            api_rate_limit: match get("API_RATE_LIMIT") {
                Some(v) => Some(
                    v.parse()
                        .with_context(|| format!("API_RATE_LIMIT=`{v}` is not an integer"))?,
                ),
                None => None,
            },
            api_timeout_ms: parse_u64("API_TIMEOUT", defaults::API_TIMEOUT_MS)?,
            enable_cache: parse_bool("ENABLE_CACHE", true)?,
            enable_swagger: parse_bool("ENABLE_SWAGGER", false)?,
            enable_jwt_auth: parse_bool("ENABLE_JWT_AUTH", false)?,
            enable_dynamic_config: parse_bool("ENABLE_DYNAMIC_CONFIG", true)?,
            enable_metrics: parse_bool("ENABLE_METRICS", true)?,
            enable_tracing: parse_bool("ENABLE_TRACING", false)?,
            cost_optimize: parse_bool("COST_OPTIMIZE", false)?,
            quality_optimize: parse_bool("QUALITY_OPTIMIZE", true)?,
            latency_optimize: parse_bool("LATENCY_OPTIMIZE", false)?,
            fallback_enabled: parse_bool("FALLBACK_ENABLED", true)?,
            chain_enabled: parse_bool("CHAIN_ENABLED", false)?,
            cache_strategy,
            auto_degraded_mode: parse_bool("AUTO_DEGRADED_MODE", false)?,
            fallback_levels: parse_u32("FALLBACK_LEVELS", defaults::FALLBACK_LEVELS)?,
            request_timeout_ms: parse_u64("REQUEST_TIMEOUT_MS", defaults::REQUEST_TIMEOUT_MS)?,
            monitor_fallbacks: parse_bool("MONITOR_FALLBACKS", true)?,
            models_config: get("MODELS_CONFIG").filter(|v| !v.is_empty()).map(PathBuf::from),
        })
    }

    /// Secret the credential cipher key is derived from.
    ///
    /// Falls back to a fixed development value so local runs work unconfigured;
    /// production deployments must set `JWT_SECRET`.
    pub fn credential_secret(&self) -> &str {
        self.jwt_secret
            .as_deref()
            .unwrap_or(defaults::CREDENTIAL_SECRET)
    }

    /// Effective cache strategy after the `ENABLE_CACHE` master switch.
    pub fn effective_cache_strategy(&self) -> CacheStrategy {
        if self.enable_cache {
            self.cache_strategy
        } else {
            CacheStrategy::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    #[test]
    fn empty_environment_yields_defaults() {
        let s = settings_from(&[]).unwrap();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 3000);
        assert_eq!(s.node_env, Environment::Development);
        assert_eq!(s.redis_cache_ttl_secs, 300);
        assert_eq!(s.fallback_levels, 2);
        assert_eq!(s.request_timeout_ms, 30_000);
        assert!(s.quality_optimize);
        assert!(!s.cost_optimize);
        assert!(s.fallback_enabled);
        assert!(!s.chain_enabled);
        assert!(!s.auto_degraded_mode);
        assert!(s.monitor_fallbacks);
        assert_eq!(s.cache_strategy, CacheStrategy::Default);
        assert!(s.enable_cache);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let s = settings_from(&[
            ("PORT", "8088"),
            ("NODE_ENV", "production"),
            ("CACHE_STRATEGY", "minimal"),
            ("FALLBACK_LEVELS", "4"),
            ("CHAIN_ENABLED", "true"),
            ("QUALITY_OPTIMIZE", "false"),
            ("COST_OPTIMIZE", "1"),
        ])
        .unwrap();
        assert_eq!(s.port, 8088);
        assert_eq!(s.node_env, Environment::Production);
        assert_eq!(s.cache_strategy, CacheStrategy::Minimal);
        assert_eq!(s.fallback_levels, 4);
        assert!(s.chain_enabled);
        assert!(!s.quality_optimize);
        assert!(s.cost_optimize);
    }

    // -----------------------------------------------------------------------
    // Validation failures
    // -----------------------------------------------------------------------

    #[test]
    fn bad_port_is_rejected() {
        assert!(settings_from(&[("PORT", "not-a-port")]).is_err());
    }

    #[test]
    fn bad_node_env_is_rejected() {
        let err = settings_from(&[("NODE_ENV", "staging")]).unwrap_err();
        assert!(err.to_string().contains("NODE_ENV"));
    }

    #[test]
    fn bad_cache_strategy_is_rejected() {
        assert!(settings_from(&[("CACHE_STRATEGY", "turbo")]).is_err());
    }

    #[test]
    fn bad_boolean_is_rejected() {
        assert!(settings_from(&[("FALLBACK_ENABLED", "maybe")]).is_err());
    }

    // -----------------------------------------------------------------------
    // Derived accessors
    // -----------------------------------------------------------------------

    #[test]
    fn credential_secret_prefers_jwt_secret() {
        let s = settings_from(&[("JWT_SECRET", "super-secret")]).unwrap();
        assert_eq!(s.credential_secret(), "super-secret");

        let s = settings_from(&[]).unwrap();
        assert_eq!(s.credential_secret(), "neuroroute-development-secret");
    }

    #[test]
    fn disabling_cache_forces_none_strategy() {
        let s = settings_from(&[("ENABLE_CACHE", "false"), ("CACHE_STRATEGY", "aggressive")]).unwrap();
        assert_eq!(s.effective_cache_strategy(), CacheStrategy::None);
    }

    #[test]
    fn lmstudio_url_is_normalized_without_trailing_slash() {
        let s = settings_from(&[("LMSTUDIO_URL", "http://127.0.0.1:1234/")]).unwrap();
        assert_eq!(s.lmstudio_url, "http://127.0.0.1:1234");
    }

    #[test]
    fn empty_api_keys_read_as_absent() {
        let s = settings_from(&[("OPENAI_API_KEY", "")]).unwrap();
        assert!(s.openai_api_key.is_none());
    }
}
