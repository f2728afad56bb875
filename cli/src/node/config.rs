use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Result;
use kadnode_network::DhtConfig;
use kadnode_util::cli::config::ThreadPoolConfig;
use kadnode_util::cli::logger::LoggerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub dht: DhtConfig,

    /// HTTP gateway. Disabled when `null`.
    pub http: Option<HttpConfig>,

    pub logger: LoggerConfig,

    pub threads: ThreadPoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dht: DhtConfig::default(),
            http: Some(HttpConfig::default()),
            logger: LoggerConfig::default(),
            threads: ThreadPoolConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        kadnode_util::serde_helpers::load_json_from_file(path)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        kadnode_util::serde_helpers::save_json_to_file(self, path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Default: `0.0.0.0:3000`.
    pub listen_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: (Ipv4Addr::UNSPECIFIED, 3000).into(),
        }
    }
}
