//! Server configuration: a `serde`-deserialized file, overridable by `clap`-parsed CLI
//! flags, the same layering of `clap::Parser` over a `serde`-backed config struct used
//! by this workspace's other auxiliary binaries.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Static server configuration: buffer geometry, read margin, and the two TCP
/// listening ports (control and data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bytes per block in the shared capture buffer. Typical size `2^18`.
    pub block_size: usize,
    /// Number of blocks in the ring. Typical value 16.
    pub block_count: usize,
    /// How many slots behind the writer a newly-opened reader starts.
    pub read_margin: usize,
    /// Address the control-protocol listener binds.
    pub control_bind: SocketAddr,
    /// Address the data-streaming listener binds.
    pub data_bind: SocketAddr,
    /// Simulated hardware sample rate, bytes/second.
    pub hw_bytes_per_second: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            block_size: 1 << 18,
            block_count: 16,
            read_margin: 1,
            control_bind: "0.0.0.0:8888".parse().unwrap(),
            data_bind: "0.0.0.0:8889".parse().unwrap(),
            hw_bytes_per_second: 1 << 20,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigLoadError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },
    #[snafu(display("failed to parse config file {}: {source}", path.display()))]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

impl ServerConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        serde_yaml::from_str(&text).context(ParseSnafu { path })
    }
}

/// Command-line flags, layered over [`ServerConfig`]: a config file path plus the
/// handful of settings worth overriding without editing the file.
#[derive(Debug, Parser)]
#[command(name = "capture-server", about = "Data-capture server core: circular buffer, coordinator, LUT compiler")]
pub struct Cli {
    /// Path to a YAML config file. When absent, built-in defaults are used.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub control_bind: Option<SocketAddr>,

    #[arg(long)]
    pub data_bind: Option<SocketAddr>,

    #[arg(long)]
    pub block_size: Option<usize>,

    #[arg(long)]
    pub block_count: Option<usize>,
}

impl Cli {
    /// Resolve a [`ServerConfig`] by loading `--config` (if given) and applying any
    /// flags that were also passed, flags taking precedence.
    pub fn resolve(&self) -> Result<ServerConfig, ConfigLoadError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(addr) = self.control_bind {
            config.control_bind = addr;
        }
        if let Some(addr) = self.data_bind {
            config.data_bind = addr;
        }
        if let Some(size) = self.block_size {
            config.block_size = size;
        }
        if let Some(count) = self.block_count {
            config.block_count = count;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let config = ServerConfig::default();
        assert!(config.block_size > 0);
        assert!(config.block_count >= 2);
    }

    #[test]
    fn loads_and_overrides_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.yaml");
        std::fs::write(&path, "block_size: 4096\nblock_count: 8\nread_margin: 2\n").unwrap();

        let cli = Cli { config: Some(path), control_bind: None, data_bind: None, block_size: None, block_count: None };
        let config = cli.resolve().unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.block_count, 8);
        assert_eq!(config.read_margin, 2);
        // Untouched fields keep their serde defaults, confirming `#[serde(default)]`
        // lets a config file specify only the fields it cares about.
        assert_eq!(config.hw_bytes_per_second, ServerConfig::default().hw_bytes_per_second);
    }

    #[test]
    fn cli_flags_override_the_loaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.yaml");
        std::fs::write(&path, "block_size: 4096\n").unwrap();

        let cli = Cli {
            config: Some(path),
            control_bind: None,
            data_bind: None,
            block_size: Some(8192),
            block_count: None,
        };
        assert_eq!(cli.resolve().unwrap().block_size, 8192);
    }

    #[test]
    fn missing_config_file_is_a_load_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/capture.yaml")),
            control_bind: None,
            data_bind: None,
            block_size: None,
            block_count: None,
        };
        assert!(cli.resolve().is_err());
    }
}
