use std::env;
use std::time::Duration;

use retouch_contracts::presets::ANIMATION_TIPS;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Knobs for the remote client and the animation poll loop. Every field can
/// be overridden from the environment; values are clamped to sane ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_animation_wait: Duration,
    pub tip_interval: Duration,
    pub tips: Vec<String>,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 60,
            max_animation_wait: Duration::from_secs(900),
            tip_interval: Duration::from_secs(4),
            tips: ANIMATION_TIPS.iter().map(|tip| (*tip).to_string()).collect(),
            request_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(1200),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite())
        };

        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.api_base);

        Self {
            api_base,
            poll_interval: seconds(
                number("RETOUCH_POLL_INTERVAL"),
                defaults.poll_interval,
                0.0,
                60.0,
            ),
            max_poll_attempts: number("RETOUCH_MAX_POLL_ATTEMPTS")
                .map(|value| value.round().clamp(1.0, 720.0) as u32)
                .unwrap_or(defaults.max_poll_attempts),
            max_animation_wait: seconds(
                number("RETOUCH_MAX_ANIMATION_WAIT"),
                defaults.max_animation_wait,
                30.0,
                3600.0,
            ),
            tip_interval: seconds(
                number("RETOUCH_TIP_INTERVAL"),
                defaults.tip_interval,
                1.0,
                60.0,
            ),
            tips: defaults.tips,
            request_timeout: seconds(
                number("RETOUCH_REQUEST_TIMEOUT"),
                defaults.request_timeout,
                15.0,
                300.0,
            ),
            transport_retries: number("RETOUCH_TRANSPORT_RETRIES")
                .map(|value| value.round().clamp(0.0, 4.0) as usize)
                .unwrap_or(defaults.transport_retries),
            retry_backoff: defaults.retry_backoff,
        }
    }
}

fn seconds(value: Option<f64>, default: Duration, min: f64, max: f64) -> Duration {
    value
        .map(|raw| Duration::from_secs_f64(raw.clamp(min, max)))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        EngineConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn defaults_match_reference_timings() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.tip_interval, Duration::from_secs(4));
        assert_eq!(config.tips.len(), 5);
    }

    #[test]
    fn env_overrides_are_clamped() {
        let config = config_from(&[
            ("GEMINI_API_BASE", " https://proxy.example/v1/ "),
            ("RETOUCH_POLL_INTERVAL", "500"),
            ("RETOUCH_MAX_POLL_ATTEMPTS", "0"),
            ("RETOUCH_MAX_ANIMATION_WAIT", "5"),
            ("RETOUCH_TIP_INTERVAL", "2.5"),
            ("RETOUCH_REQUEST_TIMEOUT", "nope"),
            ("RETOUCH_TRANSPORT_RETRIES", "9"),
        ]);
        assert_eq!(config.api_base, "https://proxy.example/v1");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.max_poll_attempts, 1);
        assert_eq!(config.max_animation_wait, Duration::from_secs(30));
        assert_eq!(config.tip_interval, Duration::from_millis(2500));
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.transport_retries, 4);
    }
}
