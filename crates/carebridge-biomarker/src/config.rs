//! Service configuration from the environment.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::BiomarkerError;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9091,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Reads `BIOMARKER_HOST`, `BIOMARKER_PORT` and `BIOMARKER_LOG_LEVEL`
    /// through `var`, falling back to defaults for unset or blank values.
    pub fn from_env<F>(var: F) -> Result<Self, BiomarkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = read("BIOMARKER_HOST") {
            config.host = host
                .trim()
                .parse()
                .map_err(|_| BiomarkerError::InvalidConfig(format!("BIOMARKER_HOST={host}")))?;
        }
        if let Some(port) = read("BIOMARKER_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| BiomarkerError::InvalidConfig(format!("BIOMARKER_PORT={port}")))?;
        }
        if let Some(level) = read("BIOMARKER_LOG_LEVEL") {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ServiceConfig::from_env(env(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.port, 9091);
    }

    #[test]
    fn overrides_apply() {
        let config = ServiceConfig::from_env(env(&[
            ("BIOMARKER_HOST", "0.0.0.0"),
            ("BIOMARKER_PORT", "7000"),
            ("BIOMARKER_LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.host.to_string(), "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = ServiceConfig::from_env(env(&[("BIOMARKER_PORT", "ninety")])).unwrap_err();
        assert!(matches!(err, BiomarkerError::InvalidConfig(_)));
    }
}
