use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::Result;
use kadnode_network::{Dht, DhtConfig, MemoryNetwork, MemoryTransport};

pub type TestNode = Dht<MemoryTransport>;

pub fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn make_fast_dht_config() -> DhtConfig {
    DhtConfig {
        request_timeout: Duration::from_millis(100),
        stored_value_ttl: Duration::from_millis(600),
        expiry_sweep_period: Duration::from_millis(50),
        refresh_period: Duration::from_millis(150),
        ..Default::default()
    }
}

pub async fn make_node(network: &MemoryNetwork, last: u8) -> Result<TestNode> {
    make_node_with_config(network, last, make_fast_dht_config()).await
}

pub async fn make_node_with_config(
    network: &MemoryNetwork,
    last: u8,
    config: DhtConfig,
) -> Result<TestNode> {
    Dht::builder(ip(last))
        .with_config(config)
        .bind(network.transport())
        .await
}

/// Node `10.0.0.1` is the bootstrap, the rest join it one by one.
pub async fn make_joined_network(count: u8) -> Result<(MemoryNetwork, Vec<TestNode>)> {
    make_joined_network_with_config(count, make_fast_dht_config()).await
}

pub async fn make_joined_network_with_config(
    count: u8,
    config: DhtConfig,
) -> Result<(MemoryNetwork, Vec<TestNode>)> {
    let network = MemoryNetwork::new();

    let mut nodes = Vec::with_capacity(count as usize);
    for last in 1..=count {
        let node = make_node_with_config(&network, last, config.clone()).await?;
        if last > 1 {
            node.join(ip(1)).await?;
        }
        nodes.push(node);
    }

    Ok((network, nodes))
}
