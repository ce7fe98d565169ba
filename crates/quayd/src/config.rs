//! TOML configuration for the Quay daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quay_connector::NetOptions;
use quay_engine::QuayServerConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Local data directory.
    pub node: NodeSection,
    /// Record store backend.
    pub meta: MetaSection,
    /// Coordinator tuning.
    pub server: ServerSection,
    /// Network transport timeouts.
    pub net: NetSection,
    /// Node agent settings.
    pub agent: AgentSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (metadata DB, default agent root).
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".quay"))
            .unwrap_or_else(|| PathBuf::from(".quay"));
        Self { data_dir }
    }
}

/// `[meta]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MetaSection {
    /// Backend type: `"fjall"` (default) or `"memory"`.
    pub backend: String,
}

impl Default for MetaSection {
    fn default() -> Self {
        Self {
            backend: "fjall".to_string(),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Placement retries when a chosen node disappears. Defaults to 4.
    pub placement_attempts: Option<usize>,
}

/// `[net]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NetSection {
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request I/O timeout in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            io_timeout_ms: 30_000,
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Address the node agent listens on.
    pub listen_addr: String,
    /// Directory served by the agent. Defaults to `<data_dir>/agent`.
    pub root: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4830".to_string(),
            root: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Location of the fjall metadata database.
    pub fn meta_path(&self) -> PathBuf {
        self.node.data_dir.join("meta")
    }

    /// Effective agent root directory.
    pub fn agent_root(&self) -> PathBuf {
        self.agent
            .root
            .clone()
            .unwrap_or_else(|| self.node.data_dir.join("agent"))
    }

    /// Timeouts for [`NetConnector`](quay_connector::NetConnector).
    pub fn net_options(&self) -> NetOptions {
        NetOptions {
            connect_timeout: Duration::from_millis(self.net.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.net.io_timeout_ms),
        }
    }

    /// Coordinator configuration.
    pub fn server_config(&self) -> QuayServerConfig {
        let defaults = QuayServerConfig::default();
        QuayServerConfig {
            placement_attempts: self
                .server
                .placement_attempts
                .unwrap_or(defaults.placement_attempts),
            net: self.net_options(),
        }
    }
}
