//! Configuration management for Lambda functions.

use std::env;

use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database host
    pub db_host: String,
    /// Database port
    pub db_port: u16,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: String,
    /// Pool size per function instance
    pub db_max_connections: u32,
    /// AWS region
    pub aws_region: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} not set", key)))
        };

        let db_port = match lookup("DB_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid DB_PORT: {}", port)))?,
            None => 5432,
        };

        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(n) => n
                .parse()
                .map_err(|_| Error::Config(format!("Invalid DB_MAX_CONNECTIONS: {}", n)))?,
            None => 5,
        };

        Ok(Self {
            db_host: required("DB_HOST")?,
            db_port,
            db_name: lookup("DB_NAME").unwrap_or_else(|| "crew_marketplace".to_string()),
            db_secret_arn: required("DB_SECRET_ARN")?,
            db_max_connections,
            aws_region: lookup("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_SECRET_ARN", "arn:aws:secretsmanager:us-east-1:123:secret:db"),
        ]))
        .unwrap();

        assert_eq!(config.db_port, 5432);
        assert_eq!(config.db_name, "crew_marketplace");
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.aws_region, "us-east-1");
    }

    #[test]
    fn test_missing_host() {
        let err = Config::from_lookup(lookup_from(&[("DB_SECRET_ARN", "arn")])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("DB_HOST")));
    }

    #[test]
    fn test_invalid_port() {
        let err = Config::from_lookup(lookup_from(&[
            ("DB_HOST", "db"),
            ("DB_SECRET_ARN", "arn"),
            ("DB_PORT", "five"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
