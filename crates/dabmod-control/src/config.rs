use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9400;
pub const DEFAULT_COEF_PATH: &str = "poly.coef";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Address of the engine's control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, as handed to the TCP resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlConfigInput {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub coef_path: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    pub endpoint: Endpoint,
    /// File shared with the engine; it re-reads it on `set memlesspoly coeffile`.
    pub coef_path: PathBuf,
    /// Upper bound for one whole exchange, connect through reply.
    pub timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            endpoint: Endpoint::default(),
            coef_path: PathBuf::from(DEFAULT_COEF_PATH),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ControlConfigInput {
    pub fn resolve(self) -> Result<ControlConfig> {
        let defaults = ControlConfig::default();

        let host = match self.host {
            Some(host) => {
                let trimmed = host.trim();
                if trimmed.is_empty() {
                    return Err(Error::Config("host must not be empty".into()));
                }
                trimmed.to_string()
            }
            None => defaults.endpoint.host,
        };

        let port = self.port.unwrap_or(defaults.endpoint.port);
        if port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }

        let coef_path = self.coef_path.unwrap_or(defaults.coef_path);
        if coef_path.as_os_str().is_empty() {
            return Err(Error::Config("coef_path must not be empty".into()));
        }

        let timeout = match self.timeout_ms {
            Some(0) => return Err(Error::Config("timeout_ms must be positive".into())),
            Some(ms) => Duration::from_millis(ms),
            None => defaults.timeout,
        };

        Ok(ControlConfig {
            endpoint: Endpoint { host, port },
            coef_path,
            timeout,
        })
    }
}

impl ControlConfig {
    pub fn new(port: u16, coef_path: impl Into<PathBuf>) -> Self {
        ControlConfig {
            endpoint: Endpoint::new(DEFAULT_HOST, port),
            coef_path: coef_path.into(),
            ..ControlConfig::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(ControlConfig::default());
        }
        let parsed: ControlConfigInput =
            toml::from_str(input).map_err(|e| Error::Config(format!("invalid config TOML: {e}")))?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.endpoint.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            host = "dabmod.local"
            port = 9401
            coef_path = "/var/lib/dpd/poly.coef"
            timeout_ms = 750
        "#;

        let cfg = ControlConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.endpoint, Endpoint::new("dabmod.local", 9401));
        assert_eq!(cfg.coef_path, PathBuf::from("/var/lib/dpd/poly.coef"));
        assert_eq!(cfg.timeout, Duration::from_millis(750));
        assert_eq!(cfg.endpoint.to_string(), "tcp://dabmod.local:9401");
        assert_eq!(cfg.endpoint.address(), "dabmod.local:9401");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = ControlConfig::from_toml_str("  \n").unwrap();
        assert_eq!(cfg, ControlConfig::default());
        assert_eq!(cfg.endpoint.host, "localhost");
        assert_eq!(cfg.endpoint.port, 9400);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg = ControlConfig::from_toml_str("port = 1234").unwrap();
        assert_eq!(cfg.endpoint.host, DEFAULT_HOST);
        assert_eq!(cfg.endpoint.port, 1234);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ControlConfig::from_toml_str("port = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ControlConfig::from_toml_str("host = \"  \""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ControlConfig::from_toml_str("timeout_ms = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ControlConfig::from_toml_str("port = \"nine\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapt.toml");
        std::fs::write(&path, "port = 9555\ncoef_path = \"x.coef\"\n").unwrap();
        let cfg = ControlConfig::load(&path).unwrap();
        assert_eq!(cfg.endpoint.port, 9555);
        assert_eq!(cfg.coef_path, PathBuf::from("x.coef"));

        let missing = ControlConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::Io { .. })));
    }
}
