use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub history_page: u32,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("MURMUR_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MURMUR_JWT_SECRET is unset or still a placeholder");
        }

        let db_path = get("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()).into();
        let host = get("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("MURMUR_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("MURMUR_PORT must be a port number")?;
        let history_page: u32 = get("MURMUR_HISTORY_PAGE")
            .unwrap_or_else(|| "20".into())
            .parse()
            .context("MURMUR_HISTORY_PAGE must be a positive integer")?;
        if history_page == 0 {
            bail!("MURMUR_HISTORY_PAGE must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path,
            host,
            port,
            history_page,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "a-real-secret")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.history_page, 20);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "dev-secret-change-me")]))
                .is_err()
        );
    }

    #[test]
    fn bad_numbers_are_refused() {
        assert!(
            ServerConfig::from_lookup(lookup(&[
                ("MURMUR_JWT_SECRET", "a-real-secret"),
                ("MURMUR_PORT", "eighty"),
            ]))
            .is_err()
        );
        assert!(
            ServerConfig::from_lookup(lookup(&[
                ("MURMUR_JWT_SECRET", "a-real-secret"),
                ("MURMUR_HISTORY_PAGE", "0"),
            ]))
            .is_err()
        );
    }
}
