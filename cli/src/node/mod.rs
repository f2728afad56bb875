use std::net::Ipv4Addr;
use std::time::Duration;

use kadnode_network::{Dht, JoinError, Transport};
use tokio::time::Instant;

pub use self::config::{HttpConfig, NodeConfig};

pub mod console;
pub mod http;

mod config;

/// Joins the network through the first responsive peer, retrying the whole
/// list until `timeout` passes. Returns whether the node joined.
pub async fn bootstrap<T: Transport>(dht: &Dht<T>, peers: &[Ipv4Addr], timeout: Duration) -> bool {
    if peers.is_empty() {
        tracing::info!("no bootstrap peers, starting a new network");
        return false;
    }

    let deadline = Instant::now() + timeout;
    loop {
        for ip in peers {
            match dht.join(*ip).await {
                Ok(()) => return true,
                Err(JoinError::SelfJoin) => {
                    tracing::debug!(%ip, "skipped own address");
                }
                Err(e) => tracing::debug!(%ip, "failed to join: {e}"),
            }
        }

        if Instant::now() >= deadline {
            tracing::warn!(
                timeout = %humantime::format_duration(timeout),
                "failed to join the network"
            );
            return false;
        }
        tokio::time::sleep(JOIN_RETRY_INTERVAL).await;
    }
}

const JOIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
