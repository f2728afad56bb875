use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use kadnode_network::{Contact, Dht, DhtConfig, JoinError, KadId, MemoryNetwork};

use self::common::{
    ip, make_fast_dht_config, make_joined_network, make_joined_network_with_config, make_node,
};

mod common;

#[tokio::test]
async fn join_adds_bootstrap_peer() -> Result<()> {
    kadnode_util::test::init_logger("join_adds_bootstrap_peer", "debug");

    let network = MemoryNetwork::new();
    let x = make_node(&network, 1).await?;
    let y = make_node(&network, 2).await?;

    y.join(ip(1)).await?;
    assert!(y.contains_peer(x.local_id()));
    assert_eq!(y.known_peers(), [*x.local_contact()]);

    Ok(())
}

#[tokio::test]
async fn join_unreachable_peer() -> Result<()> {
    kadnode_util::test::init_logger("join_unreachable_peer", "debug");

    let network = MemoryNetwork::new();
    let x = make_node(&network, 1).await?;

    assert!(matches!(
        x.join(ip(2)).await,
        Err(JoinError::PeerUnreachable(addr)) if addr == ip(2)
    ));
    assert!(matches!(x.join(ip(1)).await, Err(JoinError::SelfJoin)));
    assert!(x.known_peers().is_empty());

    Ok(())
}

#[tokio::test]
async fn node_lookup_returns_other_peers() -> Result<()> {
    kadnode_util::test::init_logger("node_lookup_returns_other_peers", "debug");

    let (_network, nodes) = make_joined_network(3).await?;
    let [x, y, z] = &nodes[..] else {
        unreachable!()
    };

    let mut found = z.node_lookup(x.local_id()).await;
    found.sort_by_key(|contact| contact.ip);
    assert_eq!(found, [*x.local_contact(), *y.local_contact()]);

    Ok(())
}

#[tokio::test]
async fn data_lookup_from_joined_peer() -> Result<()> {
    kadnode_util::test::init_logger("data_lookup_from_joined_peer", "debug");

    let (_network, nodes) = make_joined_network(2).await?;
    let [x, y] = &nodes[..] else { unreachable!() };

    let key = x.put(Bytes::from_static(b"Hello world!")).await?;
    assert_eq!(key, KadId::from_content(b"Hello world!"));

    let res = y.get(&key).await;
    assert_eq!(res.value.as_deref(), Some(&b"Hello world!"[..]));
    assert_eq!(res.contacts.len(), 1);

    Ok(())
}

#[tokio::test]
async fn data_lookup_for_unknown_key() -> Result<()> {
    kadnode_util::test::init_logger("data_lookup_for_unknown_key", "debug");

    let (_network, nodes) = make_joined_network(4).await?;

    let res = nodes[3].get(&KadId::from_content(b"nobody has it")).await;
    assert_eq!(res.value, None);
    assert!(!res.contacts.is_empty());
    assert!(res.contacts.len() <= make_fast_dht_config().max_k);
    assert!(!res.contacts.contains(nodes[3].local_contact()));

    Ok(())
}

#[tokio::test]
async fn store_and_lookup_across_network() -> Result<()> {
    kadnode_util::test::init_logger("store_and_lookup_across_network", "info");

    let (_network, nodes) = make_joined_network(8).await?;

    let mut keys = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let value = Bytes::from(format!("value from node {i}"));
        keys.push((node.put(value.clone()).await?, value));
    }

    for node in &nodes {
        for (key, value) in &keys {
            let res = node.get(key).await;
            assert_eq!(res.value.as_ref(), Some(value), "node {}", node.local_contact());
            assert!(res.holder().is_some());
        }
    }

    Ok(())
}

#[tokio::test]
async fn lookups_span_network_larger_than_k() -> Result<()> {
    kadnode_util::test::init_logger("lookups_span_network_larger_than_k", "info");

    const NODES: u8 = 30;
    const MAX_K: usize = 4;

    let config = DhtConfig {
        max_k: MAX_K,
        alpha: 2,
        request_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let (_network, nodes) = make_joined_network_with_config(NODES, config).await?;

    let mut keys = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        let value = Bytes::from(format!("object {i}"));
        let key = node.put(value.clone()).await?;
        keys.push((key, value));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Each value lives on at most k nodes, so most reads leave the local store
    let mut remote_hits = 0usize;
    for node in &nodes {
        for (key, value) in &keys {
            let held_locally = node.storage().contains(key);

            let res = node.get(key).await;
            assert_eq!(res.value.as_ref(), Some(value), "node {}", node.local_contact());
            assert_eq!(res.contacts.len(), 1);

            if !held_locally {
                assert_ne!(res.holder(), Some(node.local_contact()));
                remote_hits += 1;
            }
        }
    }
    assert!(remote_hits > keys.len() * (NODES as usize - MAX_K - 1));

    for node in &nodes {
        let target = KadId::random();
        let found = node.node_lookup(&target).await;

        assert!(!found.is_empty());
        assert!(found.len() <= MAX_K);
        assert!(!found.contains(node.local_contact()));
        assert!(
            found
                .windows(2)
                .all(|pair| pair[0].id.distance(&target) < pair[1].id.distance(&target))
        );
    }

    Ok(())
}

#[tokio::test]
async fn storing_twice_is_idempotent() -> Result<()> {
    kadnode_util::test::init_logger("storing_twice_is_idempotent", "debug");

    let (_network, nodes) = make_joined_network(2).await?;
    let x = &nodes[0];

    let first = x.put(Bytes::from_static(b"twice")).await?;
    let second = x.put(Bytes::from_static(b"twice")).await?;
    assert_eq!(first, second);
    assert_eq!(x.storage().len(), 1);

    let holders = x.storage().remembered(&first).unwrap_or_default();
    assert_eq!(holders.len(), 2);
    assert!(holders.contains(x.local_contact()));

    Ok(())
}

#[tokio::test]
async fn rejects_empty_values() -> Result<()> {
    let network = MemoryNetwork::new();
    let x = make_node(&network, 1).await?;

    assert!(x.put(Bytes::new()).await.is_err());
    assert!(x.storage().is_empty());

    Ok(())
}

#[tokio::test]
async fn refreshed_values_outlive_ttl() -> Result<()> {
    kadnode_util::test::init_logger("refreshed_values_outlive_ttl", "debug");

    let (_network, nodes) = make_joined_network(2).await?;
    let [x, y] = &nodes[..] else { unreachable!() };

    let key = x.put(Bytes::from_static(b"keep me")).await?;
    tokio::time::sleep(3 * make_fast_dht_config().stored_value_ttl).await;

    assert!(x.storage().contains(&key));
    assert!(y.storage().contains(&key));
    assert!(y.get(&key).await.is_found());

    Ok(())
}

#[tokio::test]
async fn forgotten_values_expire() -> Result<()> {
    kadnode_util::test::init_logger("forgotten_values_expire", "debug");

    let (_network, nodes) = make_joined_network(2).await?;
    let [x, y] = &nodes[..] else { unreachable!() };

    let key = x.put(Bytes::from_static(b"short lived")).await?;
    assert!(x.get(&key).await.is_found());

    assert!(x.forget(&key));
    // Still stored until the TTL runs out
    assert!(x.storage().contains(&key));

    tokio::time::sleep(2 * make_fast_dht_config().stored_value_ttl).await;

    let res = y.get(&key).await;
    assert_eq!(res.value, None);
    assert!(!x.storage().contains(&key));
    assert!(!y.storage().contains(&key));

    Ok(())
}

#[tokio::test]
async fn full_bucket_replaces_silent_lru() -> Result<()> {
    kadnode_util::test::init_logger("full_bucket_replaces_silent_lru", "debug");

    let network = MemoryNetwork::new();
    let live = make_node(&network, 2).await?;

    // Local id differs from the live node in the first bit,
    // so every contact below lands in bucket 0.
    let mut local_id = *live.local_id();
    local_id.0[0] ^= 0x80;
    let node = Dht::builder(ip(1))
        .with_config(make_fast_dht_config())
        .with_local_id(local_id)
        .disable_background_tasks()
        .bind(network.transport())
        .await?;
    let max_k = node.config().max_k;

    let dead_contact = |i: u8| {
        let mut id = KadId::random();
        id.0[0] = (id.0[0] & 0x7f) | (live.local_id().0[0] & 0x80);
        Contact::new(id, ip(100 + i))
    };

    // Scenario 1: the least recently used peer does not respond
    let dead = (0..max_k as u8).map(dead_contact).collect::<Vec<_>>();
    for contact in &dead {
        assert!(node.add_peer(*contact).await);
    }
    assert_eq!(node.bucket_len(0), max_k);

    assert!(node.add_peer(*live.local_contact()).await);
    assert_eq!(node.bucket_len(0), max_k);
    assert!(!node.contains_peer(&dead[0].id));
    assert!(node.contains_peer(live.local_id()));

    // Scenario 2: the least recently used peer responds
    for contact in &dead[1..] {
        node.remove_peer(&contact.id);
    }
    let fresh = (0..max_k as u8 - 1)
        .map(|i| dead_contact(50 + i))
        .collect::<Vec<_>>();
    for contact in &fresh {
        assert!(node.add_peer(*contact).await);
    }
    assert_eq!(node.bucket_len(0), max_k);

    let newcomer = dead_contact(90);
    assert!(!node.add_peer(newcomer).await);
    assert_eq!(node.bucket_len(0), max_k);
    assert!(!node.contains_peer(&newcomer.id));
    assert!(node.contains_peer(live.local_id()));

    // The live peer was promoted, so the next ping hits a silent one
    let another = dead_contact(91);
    assert!(node.add_peer(another).await);
    assert!(!node.contains_peer(&fresh[0].id));
    assert!(node.contains_peer(live.local_id()));

    Ok(())
}

#[tokio::test]
async fn shutdown_stops_listener() -> Result<()> {
    let network = MemoryNetwork::new();
    let x = make_node(&network, 1).await?;
    let y = make_node(&network, 2).await?;

    assert!(y.ping(x.local_contact()).await);

    x.shutdown();
    assert!(x.is_shutdown());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!network.is_bound(&x.local_contact().socket_addr(x.config().port)));
    assert!(!y.ping(x.local_contact()).await);

    Ok(())
}
