use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::scheduler::StreamLimits;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// First URL segment the file server answers to.
    pub url_prefix: String,
    /// Storage directory that URLs are resolved against.
    pub root_path: String,
    /// Host directory standing in for the card's mount point.
    pub mount: PathBuf,
    pub listen: SocketAddr,
    pub enable_download: bool,
    pub max_read: usize,
    pub max_send: usize,
    /// Defaults to four reads worth of bytes.
    pub buffer_size: Option<usize>,
    pub max_sessions: usize,
    /// Milliseconds between two scheduler ticks.
    pub tick_interval: u64,
    /// Milliseconds a download may go without progress.
    pub idle_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url_prefix: "file".to_string(),
            root_path: "/".to_string(),
            mount: PathBuf::from("."),
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_download: false,
            max_read: 1024,
            max_send: 1024,
            buffer_size: None,
            max_sessions: 4,
            tick_interval: 10,
            idle_timeout: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Config::parse(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Config> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url_prefix.trim_matches('/').is_empty() {
            return Err(anyhow!("url_prefix must not be empty"));
        }
        if self.max_read == 0 || self.max_send == 0 {
            return Err(anyhow!("max_read and max_send must be positive"));
        }
        if self.buffer_size() < 2 {
            return Err(anyhow!("buffer_size must be at least 2 bytes"));
        }
        if self.max_sessions == 0 {
            return Err(anyhow!("max_sessions must be positive"));
        }
        if self.tick_interval == 0 {
            return Err(anyhow!("tick_interval must be positive"));
        }
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(4 * self.max_read)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval)
    }

    pub fn limits(&self) -> StreamLimits {
        StreamLimits {
            max_read: self.max_read,
            max_send: self.max_send,
            buffer_size: self.buffer_size(),
            max_sessions: self.max_sessions,
            idle_timeout: self.idle_timeout.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!("file", config.url_prefix);
        assert_eq!("/", config.root_path);
        assert!(!config.enable_download);
        assert_eq!(StreamLimits::default(), config.limits());
    }

    #[test]
    fn parses_overrides() {
        let config = Config::parse(
            r#"
            url_prefix = "sd"
            root_path = "/sdcard"
            mount = "/tmp/card"
            listen = "127.0.0.1:9000"
            enable_download = true
            max_read = 512
            idle_timeout = 30000
            "#,
        )
        .unwrap();
        assert_eq!("sd", config.url_prefix);
        assert_eq!(PathBuf::from("/tmp/card"), config.mount);
        assert_eq!(2048, config.limits().buffer_size);
        assert_eq!(Some(Duration::from_secs(30)), config.limits().idle_timeout);
        assert_eq!("127.0.0.1:9000".parse::<SocketAddr>().unwrap(), config.listen);
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert!(Config::parse("max_read = 0").is_err());
        assert!(Config::parse("buffer_size = 1").is_err());
        assert!(Config::parse("max_sessions = 0").is_err());
        assert!(Config::parse("url_prefix = \"/\"").is_err());
        assert!(Config::parse("unknown_key = 1").is_err());
    }
}
