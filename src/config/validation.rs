//! Validation rules and value parsers shared by the config sections and the CLI.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read agent config: {0}")]
    IoError(#[from] std::io::Error),

    /// The config file is not valid YAML for [`AgentConfig`](super::AgentConfig).
    #[error("invalid agent config YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid agent config: {0}")]
    ValidationError(String),
}

/// Parse a positive duration such as `500ms`, `2s` or `1m30s`.
///
/// Zero is rejected: every duration the agent reads is a period or timeout.
///
/// ```
/// use oculus_agent::config::parse_duration;
///
/// assert_eq!(parse_duration("2s").unwrap().as_secs(), 2);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// assert!(parse_duration("0s").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    match humantime::parse_duration(trimmed) {
        Ok(d) if d.is_zero() => Err(format!("duration '{trimmed}' must be positive")),
        Ok(d) => Ok(d),
        Err(e) => Err(format!("bad duration '{trimmed}': {e}")),
    }
}

/// Substitute `${VAR}` and `${VAR:-fallback}` from the process environment.
///
/// Unset variables without a fallback become empty.
pub fn expand_env_vars(input: &str) -> String {
    static PLACEHOLDER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let placeholder = PLACEHOLDER.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder regex is valid")
    });

    placeholder
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}

pub(super) fn require_positive(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ValidationError(format!("{field} must be positive")));
    }
    Ok(())
}

/// Topics are used verbatim by connectors, so they may not be blank or
/// carry surrounding whitespace.
pub(super) fn require_topic(field: &str, topic: &str) -> Result<(), ConfigError> {
    if topic.trim().is_empty() {
        return Err(ConfigError::ValidationError(format!("{field} must not be empty")));
    }
    if topic.trim() != topic {
        return Err(ConfigError::ValidationError(format!(
            "{field} '{topic}' has surrounding whitespace"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_accepts_periods() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 100ms ").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_zero_and_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").unwrap_err().contains("positive"));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_require_topic() {
        assert!(require_topic("heartbeat_topic", "heartbeat").is_ok());
        assert!(require_topic("heartbeat_topic", "  ").is_err());
        assert!(require_topic("heartbeat_topic", " heartbeat").is_err());
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("tick", Duration::from_millis(1)).is_ok());
        let err = require_positive("tick", Duration::ZERO).unwrap_err();
        assert_eq!(err.to_string(), "invalid agent config: tick must be positive");
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("tick: 1s"), "tick: 1s");
    }

    #[test]
    fn test_expand_env_vars_fallback() {
        let result = expand_env_vars("dir: ${OCULUS_AGENT_MISSING_VAR_9876:-/tmp}");
        assert_eq!(result, "dir: /tmp");
        assert_eq!(expand_env_vars("x${OCULUS_AGENT_MISSING_VAR_9876}y"), "xy");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: variable is private to this test
        unsafe {
            std::env::set_var("OCULUS_AGENT_TEST_EXPAND", "broker:1883");
        }
        assert_eq!(expand_env_vars("host: ${OCULUS_AGENT_TEST_EXPAND}"), "host: broker:1883");
        // SAFETY: see above
        unsafe {
            std::env::remove_var("OCULUS_AGENT_TEST_EXPAND");
        }
    }
}
