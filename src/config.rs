use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Which bus driver to talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// ViGEm on Windows, uinput on Linux, simulated elsewhere.
    #[default]
    Auto,
    Vigem,
    Uinput,
    Simulated,
}

impl BackendKind {
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendKind::Auto if cfg!(target_os = "windows") => BackendKind::Vigem,
            BackendKind::Auto if cfg!(target_os = "linux") => BackendKind::Uinput,
            BackendKind::Auto => BackendKind::Simulated,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Directory served for every path that is not an API route.
    pub public_dir: PathBuf,
    /// Text frame sent to each client right after the websocket opens.
    pub greeting: String,
    pub backend: BackendKind,
    /// Slot limit for the uinput and simulated buses.
    pub max_targets: usize,
    /// ViGEmClient library to load on Windows.
    pub vigem_library: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: 3000,
            public_dir: PathBuf::from("public"),
            greeting: "Hello".into(),
            backend: BackendKind::Auto,
            max_targets: 4,
            vigem_library: "ViGEmClient.dll".into(),
        }
    }
}

impl BridgeConfig {
    fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| BridgeError::Config("Cannot find config directory".into()))?
            .join("padbridge");
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join("config.json"))
    }

    /// Load from the per-user config directory, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            log::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Load an explicit config file. It must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 8080, "backend": "simulated"}"#).unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.backend, BackendKind::Simulated);
        assert_eq!(config.greeting, "Hello");
        assert_eq!(config.max_targets, 4);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = BridgeConfig {
            greeting: "hi".into(),
            public_dir: PathBuf::from("/srv/pad"),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(BridgeConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::load_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn auto_backend_resolves_per_platform() {
        let resolved = BackendKind::Auto.resolve();
        assert_ne!(resolved, BackendKind::Auto);
        assert_eq!(BackendKind::Simulated.resolve(), BackendKind::Simulated);
    }
}
