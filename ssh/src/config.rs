use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Cluster-wide parameters of the SSH server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address; a bare `":port"` binds every interface.
    pub bind_address: String,

    /// PEM-encoded private key for the SSH host identity.
    pub host_key_file: PathBuf,

    /// Image used for ephemeral containers when the resource omits one.
    pub debug_image: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ":2222".to_string(),
            host_key_file: PathBuf::from("utils/config/sample_key"),
            debug_image: "busybox".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration file, overlaying its values onto the
    /// defaults. Without a path the defaults are used as-is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config file at {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("error reading config file at {}", path.display()))
    }

    pub fn listen_address(&self) -> String {
        if self.bind_address.starts_with(':') {
            format!("0.0.0.0{}", self.bind_address)
        } else {
            self.bind_address.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, ":2222");
        assert_eq!(config.debug_image, "busybox");
        assert_eq!(config.listen_address(), "0.0.0.0:2222");
    }

    #[test]
    fn file_values_overlay_defaults() {
        let config: ServerConfig =
            serde_yaml::from_str("debug_image: alpine\n").expect("parse config");
        assert_eq!(config.debug_image, "alpine");
        assert_eq!(config.bind_address, ":2222");
    }

    #[test]
    fn explicit_host_binds_verbatim() {
        let config: ServerConfig =
            serde_yaml::from_str("bind_address: 127.0.0.1:2022\n").expect("parse config");
        assert_eq!(config.listen_address(), "127.0.0.1:2022");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(ServerConfig::load(Some(Path::new("/does/not/exist.yaml"))).is_err());
    }
}
