//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a client can be built with zero
//! configuration in tests and local development.

use std::time::Duration;

use courier_shared::constants::{
    DEFAULT_ID_SCHEME, DEFAULT_LOAD_ERROR_GRACE_MS, DEFAULT_SYNCING_RETRY_MS,
    DEFAULT_TYPING_POLL_MS, DEFAULT_TYPING_STALE_MS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST endpoint the transport talks to.
    /// Env: `COURIER_BASE_URL`
    /// Default: `https://api.layer.com`
    pub base_url: String,

    /// Scheme prefix used for generated and bare ids.
    /// Env: `COURIER_ID_SCHEME`
    /// Default: `layer`
    pub id_scheme: String,

    /// Delay before re-requesting a page the server reported as syncing.
    /// Env: `COURIER_SYNCING_RETRY_MS`
    pub syncing_retry: Duration,

    /// Time a failed load placeholder survives after its error event.
    /// Env: `COURIER_LOAD_ERROR_GRACE_MS`
    pub load_error_grace: Duration,

    /// Age after which a typing indicator is dropped.
    /// Env: `COURIER_TYPING_STALE_MS`
    pub typing_stale_after: Duration,

    /// How often typing indicators are checked for staleness.
    /// Env: `COURIER_TYPING_POLL_MS`
    pub typing_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.layer.com".to_string(),
            id_scheme: DEFAULT_ID_SCHEME.to_string(),
            syncing_retry: Duration::from_millis(DEFAULT_SYNCING_RETRY_MS),
            load_error_grace: Duration::from_millis(DEFAULT_LOAD_ERROR_GRACE_MS),
            typing_stale_after: Duration::from_millis(DEFAULT_TYPING_STALE_MS),
            typing_poll_interval: Duration::from_millis(DEFAULT_TYPING_POLL_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("COURIER_BASE_URL") {
            config.base_url = url;
        }

        if let Some(scheme) = lookup("COURIER_ID_SCHEME") {
            if scheme.is_empty() || scheme.contains(':') {
                tracing::warn!(value = %scheme, "Invalid COURIER_ID_SCHEME, using default");
            } else {
                config.id_scheme = scheme;
            }
        }

        apply_millis(&lookup, "COURIER_SYNCING_RETRY_MS", &mut config.syncing_retry);
        apply_millis(&lookup, "COURIER_LOAD_ERROR_GRACE_MS", &mut config.load_error_grace);
        apply_millis(&lookup, "COURIER_TYPING_STALE_MS", &mut config.typing_stale_after);
        apply_millis(&lookup, "COURIER_TYPING_POLL_MS", &mut config.typing_poll_interval);

        config
    }
}

fn apply_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Duration) {
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<u64>() {
        Ok(ms) => *target = Duration::from_millis(ms),
        Err(_) => tracing::warn!(key, value = %raw, "Invalid duration, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.id_scheme, "layer");
        assert_eq!(config.syncing_retry, Duration::from_millis(2_500));
        assert_eq!(config.typing_stale_after, Duration::from_secs(6));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("COURIER_ID_SCHEME", "acme"),
            ("COURIER_SYNCING_RETRY_MS", "10"),
        ]));
        assert_eq!(config.id_scheme, "acme");
        assert_eq!(config.syncing_retry, Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("COURIER_ID_SCHEME", "bad:scheme"),
            ("COURIER_TYPING_POLL_MS", "soon"),
        ]));
        assert_eq!(config.id_scheme, "layer");
        assert_eq!(config.typing_poll_interval, Duration::from_secs(5));
    }
}
