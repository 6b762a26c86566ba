//! Facade and server configuration.
//!
//! Every layer has its own config struct with sensible defaults;
//! [`DuelhallConfig`] bundles them, and [`ServerConfig`] adds what the
//! network binary needs on top. [`ServerConfig::from_env`] reads the
//! `DUELHALL_*` variables.

use std::time::Duration;

use duelhall_lobby::LobbyConfig;
use duelhall_registry::RegistryConfig;

/// Address the live server listens on when nothing else is configured.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

// ---------------------------------------------------------------------------
// SweepSettings
// ---------------------------------------------------------------------------

/// Thresholds used by the periodic cleanup pass.
///
/// The idle timeout for live sessions lives on
/// [`RegistryConfig::idle_timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    /// Time between sweeps.
    ///
    /// Default: 60 seconds.
    pub interval: Duration,

    /// `created`/`waiting` rooms older than this are deleted.
    ///
    /// Default: 24 hours.
    pub stale_room_max_age: Duration,

    /// `matched`/`in_progress` rooms with no live connection, untouched
    /// for this long, are expired.
    ///
    /// Default: 10 minutes.
    pub orphan_grace: Duration,

    /// `finished`/`expired` rooms are kept this long, then deleted.
    ///
    /// Default: 1 hour.
    pub closed_retention: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_room_max_age: Duration::from_secs(24 * 60 * 60),
            orphan_grace: Duration::from_secs(10 * 60),
            closed_retention: Duration::from_secs(60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// DuelhallConfig
// ---------------------------------------------------------------------------

/// Settings for a [`Duelhall`](crate::Duelhall) instance.
#[derive(Debug, Clone)]
pub struct DuelhallConfig {
    pub lobby: LobbyConfig,
    pub registry: RegistryConfig,
    pub sweep: SweepSettings,
    /// How long a `presence:<user>` hint survives after a live join.
    pub presence_ttl: Duration,
}

impl Default for DuelhallConfig {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            lobby: LobbyConfig::default(),
            presence_ttl: registry.idle_timeout,
            registry,
            sweep: SweepSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// A configuration value could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    Missing(&'static str),

    #[error("environment variable {var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Everything the server binary needs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// HS256 secret shared with the identity issuer.
    pub jwt_secret: String,
    pub app: DuelhallConfig,
}

impl ServerConfig {
    /// Reads the process environment.
    ///
    /// | Variable | Meaning | Default |
    /// |---|---|---|
    /// | `DUELHALL_BIND` | listen address | `127.0.0.1:8080` |
    /// | `DUELHALL_JWT_SECRET` | HS256 secret | required |
    /// | `DUELHALL_SWEEP_SECS` | sweep interval | 60 |
    /// | `DUELHALL_IDLE_SECS` | live session idle timeout | 300 |
    /// | `DUELHALL_ROOM_MAX_AGE_SECS` | max age of an open room | 86400 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env), with variables resolved by
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secs = |var: &'static str| -> Result<Option<Duration>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(n) if n > 0 => Ok(Some(Duration::from_secs(n))),
                    _ => Err(ConfigError::Invalid { var, value }),
                },
            }
        };

        let jwt_secret = lookup("DUELHALL_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("DUELHALL_JWT_SECRET"))?;

        let mut app = DuelhallConfig::default();
        if let Some(interval) = secs("DUELHALL_SWEEP_SECS")? {
            app.sweep.interval = interval;
        }
        if let Some(idle) = secs("DUELHALL_IDLE_SECS")? {
            app.registry.idle_timeout = idle;
            app.presence_ttl = idle;
        }
        if let Some(max_age) = secs("DUELHALL_ROOM_MAX_AGE_SECS")? {
            app.sweep.stale_room_max_age = max_age;
        }

        Ok(Self {
            bind: lookup("DUELHALL_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            jwt_secret,
            app,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[("DUELHALL_JWT_SECRET", "s")])).unwrap();

        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.jwt_secret, "s");
        assert_eq!(config.app.sweep, SweepSettings::default());
        assert_eq!(config.app.registry.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DUELHALL_JWT_SECRET", "s"),
            ("DUELHALL_BIND", "0.0.0.0:9000"),
            ("DUELHALL_SWEEP_SECS", "15"),
            ("DUELHALL_IDLE_SECS", "45"),
            ("DUELHALL_ROOM_MAX_AGE_SECS", "3600"),
        ]))
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.app.sweep.interval, Duration::from_secs(15));
        assert_eq!(config.app.registry.idle_timeout, Duration::from_secs(45));
        assert_eq!(config.app.presence_ttl, Duration::from_secs(45));
        assert_eq!(config.app.sweep.stale_room_max_age, Duration::from_secs(3600));
    }

    #[test]
    fn test_from_lookup_missing_secret_is_error() {
        let result = ServerConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("DUELHALL_JWT_SECRET"))));
    }

    #[test]
    fn test_from_lookup_rejects_non_numeric_and_zero() {
        for bad in ["soon", "0", "-5"] {
            let result = ServerConfig::from_lookup(lookup(&[
                ("DUELHALL_JWT_SECRET", "s"),
                ("DUELHALL_SWEEP_SECS", bad),
            ]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { var: "DUELHALL_SWEEP_SECS", .. })),
                "{bad} should be rejected"
            );
        }
    }
}
