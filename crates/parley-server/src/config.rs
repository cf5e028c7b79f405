use std::path::PathBuf;

use anyhow::{Context, Result};

use parley_crypto::password::DEFAULT_ITERATIONS;
use parley_gateway::codec::DEFAULT_MAX_FRAME_BYTES;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub session_idle_days: i64,
    pub session_sweep_secs: u64,
    pub pbkdf2_iterations: u32,
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "PARLEY_PORT", 8080)?,
            db_path: lookup("PARLEY_DB_PATH")
                .unwrap_or_else(|| "parley.db".into())
                .into(),
            session_idle_days: parse(&lookup, "PARLEY_SESSION_IDLE_DAYS", 7)?,
            session_sweep_secs: parse(&lookup, "PARLEY_SESSION_SWEEP_SECS", 3600)?,
            pbkdf2_iterations: parse(&lookup, "PARLEY_PBKDF2_ITERATIONS", DEFAULT_ITERATIONS)?,
            max_frame_bytes: parse(&lookup, "PARLEY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?,
        };

        anyhow::ensure!(config.session_idle_days > 0, "PARLEY_SESSION_IDLE_DAYS must be positive");
        anyhow::ensure!(
            config.session_sweep_secs > 0,
            "PARLEY_SESSION_SWEEP_SECS must be positive"
        );
        anyhow::ensure!(config.max_frame_bytes > 0, "PARLEY_MAX_FRAME_BYTES must be positive");
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.session_idle_days, 7);
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
    }

    #[test]
    fn overrides() {
        let config = config(&[("PARLEY_PORT", "9000"), ("PARLEY_SESSION_IDLE_DAYS", "1")]).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_idle_days, 1);
    }

    #[test]
    fn garbage_is_an_error_not_a_default() {
        let err = config(&[("PARLEY_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_PORT"));
        assert!(config(&[("PARLEY_SESSION_SWEEP_SECS", "0")]).is_err());
    }
}
