use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub const SERVICE_ACCOUNT_VAR: &str = "FIREBASE_SERVICE_ACCOUNT";

pub struct Config {
    pub host: String,
    pub port: u16,
    pub service_account: Option<PathBuf>,
    pub database: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let service_account = lookup(SERVICE_ACCOUNT_VAR)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        if service_account.is_none() {
            warn!("{SERVICE_ACCOUNT_VAR} not set, document store endpoints are disabled");
        }

        Ok(Self {
            host: try_load(&lookup, "RUST_HOST", "0.0.0.0")?,
            port: try_load(&lookup, "RUST_PORT", "5000")?,
            service_account,
            database: try_load(&lookup, "FIRESTORE_DATABASE", "(default)")?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: {raw}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_leave_store_unconfigured() {
        let config = config(&[]).unwrap();

        assert_eq!(config.address(), "0.0.0.0:5000");
        assert_eq!(config.database, "(default)");
        assert!(config.service_account.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("RUST_PORT", "8080"),
            ("RUST_HOST", "127.0.0.1"),
            (SERVICE_ACCOUNT_VAR, "/run/secrets/firebase.json"),
            ("FIRESTORE_DATABASE", "events"),
        ])
        .unwrap();

        assert_eq!(config.address(), "127.0.0.1:8080");
        assert_eq!(
            config.service_account,
            Some(PathBuf::from("/run/secrets/firebase.json"))
        );
        assert_eq!(config.database, "events");
    }

    #[test]
    fn blank_service_account_counts_as_unset() {
        assert!(config(&[(SERVICE_ACCOUNT_VAR, "  ")]).unwrap().service_account.is_none());
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = config(&[("RUST_PORT", "eighty")]).err().unwrap();

        assert!(err.to_string().contains("RUST_PORT"));
    }
}
