use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Durable store, falling back to memory when the database is unreachable
    Auto,
    Durable,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(StorageBackend::Auto),
            "durable" | "database" | "db" => Ok(StorageBackend::Durable),
            "memory" | "transient" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown STORAGE_BACKEND '{}'", other)),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub bind_addr: String,
    pub db_connection_string: String,
    pub storage_backend: StorageBackend,
    /// Requests per minute per client; 0 disables limiting
    pub rate_limit_per_minute: u32,
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DB_CONNECTION_STRING: &str = "sqlite://progress.sqlite?mode=rwc";
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            db_connection_string: DEFAULT_DB_CONNECTION_STRING.into(),
            storage_backend: StorageBackend::Auto,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `load` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let bind_addr = lookup("BIND_ADDR").unwrap_or(defaults.bind_addr);
        let db_connection_string =
            lookup("DB_CONNECTION_STRING").unwrap_or(defaults.db_connection_string);
        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse().map_err(anyhow::Error::msg)?,
            None => defaults.storage_backend,
        };
        let rate_limit_per_minute = match lookup("RATE_LIMIT_PER_MINUTE") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_PER_MINUTE: {}", value))?,
            None => defaults.rate_limit_per_minute,
        };
        Ok(Config {
            bind_addr,
            db_connection_string,
            storage_backend,
            rate_limit_per_minute,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bind_addr.trim().is_empty() {
            return Err("BIND_ADDR is empty".into());
        }
        if self.storage_backend != StorageBackend::Memory && self.db_connection_string.is_empty() {
            return Err("DB_CONNECTION_STRING is missing".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.storage_backend, StorageBackend::Auto);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("STORAGE_BACKEND", "Memory"),
            ("RATE_LIMIT_PER_MINUTE", "0"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.rate_limit_per_minute, 0);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup_from(&[("STORAGE_BACKEND", "mongo")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("RATE_LIMIT_PER_MINUTE", "lots")])).is_err());
        let config = Config::from_lookup(lookup_from(&[("BIND_ADDR", " ")])).unwrap();
        assert!(config.validate().is_err());
    }
}
