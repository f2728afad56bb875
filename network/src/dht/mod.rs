use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use self::query::{Lookup, LookupMode, LookupOutcome};
pub use self::config::{ConfigError, DhtConfig};
pub use self::routing::{AddResult, RoutingTable};
pub use self::storage::{Storage, StoreError};
use crate::proto::Message;
use crate::transport::{Socket, Transport, UdpTransport};
use crate::types::{Contact, KadId};
use crate::util::TaskPool;

mod background_tasks;
mod config;
mod query;
mod routing;
mod storage;

pub struct DhtBuilder {
    local_ip: Ipv4Addr,
    local_id: Option<KadId>,
    config: DhtConfig,
    disable_background_tasks: bool,
}

impl DhtBuilder {
    pub fn with_config(mut self, config: DhtConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the identifier derived from the local address.
    pub fn with_local_id(mut self, local_id: KadId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    /// Disables the expiry sweep and the refresh broadcast.
    pub fn disable_background_tasks(mut self) -> Self {
        self.disable_background_tasks = true;
        self
    }

    /// Binds the listener socket and starts the node.
    pub async fn bind<T: Transport>(self, transport: T) -> Result<Dht<T>> {
        self.config.validate().context("invalid DHT config")?;

        let local = Contact::new(
            self.local_id
                .unwrap_or_else(|| KadId::from_address(&self.local_ip)),
            self.local_ip,
        );

        let listen_addr = local.socket_addr(self.config.port);
        let socket = transport
            .bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind DHT socket to {listen_addr}"))?;

        let cancel = CancellationToken::new();
        let inner = Arc::new(DhtInner {
            local,
            routing_table: Mutex::new(RoutingTable::new(local, self.config.max_k)),
            storage: Storage::new(
                self.config.stored_value_ttl,
                self.config.max_value_len(),
                self.config.max_k,
            ),
            tasks: TaskPool::new(self.config.max_background_tasks, cancel.child_token()),
            config: self.config,
            transport,
            cancel,
        });

        inner.start_listener(socket);
        if !self.disable_background_tasks {
            inner.start_background_tasks();
        }

        tracing::info!(local_id = %local.id, %listen_addr, "DHT node started");
        Ok(Dht { inner })
    }
}

/// Outcome of a value lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueLookup {
    /// The value, if some peer had it.
    pub value: Option<Bytes>,
    /// The single holder of the value when found, the closest reached
    /// peers otherwise.
    pub contacts: Vec<Contact>,
}

impl ValueLookup {
    pub fn holder(&self) -> Option<&Contact> {
        self.value.as_ref().and(self.contacts.first())
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }
}

pub struct Dht<T: Transport = UdpTransport> {
    inner: Arc<DhtInner<T>>,
}

impl<T: Transport> Clone for Dht<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Dht {
    pub fn builder(local_ip: Ipv4Addr) -> DhtBuilder {
        DhtBuilder {
            local_ip,
            local_id: None,
            config: Default::default(),
            disable_background_tasks: false,
        }
    }
}

impl<T: Transport> Dht<T> {
    pub fn local_id(&self) -> &KadId {
        &self.inner.local.id
    }

    pub fn local_contact(&self) -> &Contact {
        &self.inner.local
    }

    pub fn config(&self) -> &DhtConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// Snapshot of all peers in the routing table.
    pub fn known_peers(&self) -> Vec<Contact> {
        self.inner.routing_table.lock().iter().copied().collect()
    }

    pub fn contains_peer(&self, id: &KadId) -> bool {
        self.inner.routing_table.lock().contains(id)
    }

    pub fn bucket_len(&self, index: usize) -> usize {
        self.inner.routing_table.lock().bucket_len(index)
    }

    pub fn remove_peer(&self, id: &KadId) -> Option<Contact> {
        self.inner.routing_table.lock().remove(id)
    }

    /// Adds a peer to the routing table, probing the least recently used
    /// member of a full bucket. Returns whether the peer ended up in the table.
    pub async fn add_peer(&self, peer: Contact) -> bool {
        self.inner.add_peer(peer).await
    }

    pub async fn ping(&self, peer: &Contact) -> bool {
        self.inner.ping(peer).await
    }

    /// Bootstraps from a peer known only by its address.
    #[tracing::instrument(level = "debug", skip_all, fields(local_id = %self.inner.local.id, %ip))]
    pub async fn join(&self, ip: Ipv4Addr) -> Result<(), JoinError> {
        if ip == self.inner.local.ip {
            return Err(JoinError::SelfJoin);
        }

        let peer = Contact::from_address(ip);
        if !self.inner.ping(&peer).await {
            return Err(JoinError::PeerUnreachable(ip));
        }
        self.inner.add_peer(peer).await;

        let closest = self.node_lookup(&self.inner.local.id).await;
        tracing::info!(%peer, found = closest.len(), "joined the network");
        Ok(())
    }

    /// Up to `k` reachable peers closest to `target`, ascending by distance.
    #[tracing::instrument(level = "debug", skip_all, fields(local_id = %self.inner.local.id, %target))]
    pub async fn node_lookup(&self, target: &KadId) -> Vec<Contact> {
        match Lookup::new(&self.inner, *target, LookupMode::Node).run().await {
            LookupOutcome::Closest(contacts) => contacts,
            LookupOutcome::Found { .. } => Vec::new(),
        }
    }

    /// Searches the network for a value, checking the local store first.
    #[tracing::instrument(level = "debug", skip_all, fields(local_id = %self.inner.local.id, %key))]
    pub async fn data_lookup(&self, key: &KadId) -> ValueLookup {
        if let Some(value) = self.inner.storage.get(key) {
            return ValueLookup {
                value: Some(value),
                contacts: vec![self.inner.local],
            };
        }

        match Lookup::new(&self.inner, *key, LookupMode::Data).run().await {
            LookupOutcome::Found { value, holder } => ValueLookup {
                value: Some(value),
                contacts: vec![holder],
            },
            LookupOutcome::Closest(contacts) => ValueLookup {
                value: None,
                contacts,
            },
        }
    }

    /// Sends the value to the `k` closest peers (this node included when it
    /// is close enough) and remembers them for refreshing.
    /// Returns the chosen holders.
    #[tracing::instrument(level = "debug", skip_all, fields(local_id = %self.inner.local.id, %key))]
    pub async fn store(&self, key: KadId, value: Bytes) -> Result<Vec<Contact>, StoreError> {
        let inner = &self.inner;
        inner.storage.check_value(&value)?;

        let local = inner.local;
        let mut holders = self.node_lookup(&key).await;
        if holders.len() < inner.config.max_k {
            holders.push(local);
        } else if let Some(worst) = holders.last_mut() {
            if local.id.distance(&key) < worst.id.distance(&key) {
                *worst = local;
            }
        }

        for holder in &holders {
            if holder.id == local.id {
                inner.storage.insert(key, value.clone())?;
                continue;
            }

            let this = inner.clone();
            let holder = *holder;
            let message = Message::Store {
                requester: local.id,
                key,
                value: value.clone(),
            };
            inner
                .tasks
                .spawn(async move { this.send(&holder, &message).await })
                .await;
        }

        tracing::debug!(holders = holders.len(), "stored value");
        inner.storage.remember(key, holders.clone());
        Ok(holders)
    }

    /// Stores content under its hash.
    pub async fn put(&self, value: Bytes) -> Result<KadId, StoreError> {
        let key = KadId::from_content(&value);
        self.store(key, value).await?;
        Ok(key)
    }

    pub async fn get(&self, key: &KadId) -> ValueLookup {
        self.data_lookup(key).await
    }

    /// Stops refreshing the value. Copies expire once their TTL lapses.
    pub fn forget(&self, key: &KadId) -> bool {
        self.inner.storage.forget(key)
    }

    /// Resets the TTL of a locally stored value.
    pub fn refresh(&self, key: &KadId) -> bool {
        self.inner.storage.refresh(key)
    }

    /// Stops the listener and the background loops.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("cannot join self")]
    SelfJoin,
    #[error("peer {0} is unreachable")]
    PeerUnreachable(Ipv4Addr),
}

struct DhtInner<T: Transport> {
    local: Contact,
    config: DhtConfig,
    transport: T,
    routing_table: Mutex<RoutingTable>,
    storage: Storage,
    tasks: TaskPool,
    cancel: CancellationToken,
}

impl<T: Transport> DhtInner<T> {
    fn start_listener(self: &Arc<Self>, socket: T::Socket) {
        let this = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let mut buffer = vec![0; self.config.max_datagram_size];

        tokio::spawn(async move {
            tracing::debug!("DHT listener started");
            loop {
                let (len, from) = tokio::select! {
                    res = socket.recv_from(&mut buffer) => match res {
                        Ok(res) => res,
                        Err(e) => {
                            tracing::warn!("failed to receive datagram: {e}");
                            continue;
                        }
                    },
                    _ = cancel.cancelled() => break,
                };

                let Some(this) = this.upgrade() else {
                    break;
                };

                let request = match Message::decode(Bytes::copy_from_slice(&buffer[..len])) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(%from, "dropped malformed datagram: {e}");
                        continue;
                    }
                };
                tracing::trace!(%from, kind = ?request.kind(), "received datagram");

                // Replies never include the requester, so it is added afterwards
                if let Some(reply) = this.handle_request(&request) {
                    if let Err(e) = socket.send_to(&reply.encode(), from).await {
                        tracing::debug!(%from, "failed to send reply: {e}");
                    }
                }

                if let Some(requester) = request.requester() {
                    this.observe_peer(Contact::new(*requester, *from.ip()));
                }
            }
            tracing::debug!("DHT listener finished");
        });
    }

    fn handle_request(&self, request: &Message) -> Option<Message> {
        match request {
            Message::Ping => Some(Message::PingAck),
            Message::Store { key, value, .. } => {
                match self.storage.insert(*key, value.clone()) {
                    Ok(new) => tracing::trace!(%key, new, "stored value"),
                    Err(e) => tracing::debug!(%key, "rejected value: {e}"),
                }
                None
            }
            Message::FindNode { requester, target } => Some(Message::FindNodeAck {
                contacts: self.closest_for_reply(target, requester),
            }),
            Message::FindData { requester, key } => Some(match self.storage.get(key) {
                Some(value) => Message::FindDataSuccess { value },
                None => Message::FindDataFail {
                    contacts: self.closest_for_reply(key, requester),
                },
            }),
            Message::RefreshTtl { key, .. } => {
                if !self.storage.refresh(key) {
                    tracing::warn!(%key, "refresh of an unknown value");
                }
                None
            }
            Message::PingAck
            | Message::FindNodeAck { .. }
            | Message::FindDataSuccess { .. }
            | Message::FindDataFail { .. } => {
                tracing::debug!(kind = ?request.kind(), "unexpected reply on listener");
                None
            }
        }
    }

    /// Up to `k` contacts closest to `target`, never including the requester.
    fn closest_for_reply(&self, target: &KadId, requester: &KadId) -> Vec<Contact> {
        let max_k = self.config.max_k;
        let mut contacts = self.routing_table.lock().closest(target, max_k + 1);
        match contacts.iter().position(|contact| &contact.id == requester) {
            Some(index) => {
                contacts.remove(index);
            }
            None => contacts.truncate(max_k),
        }
        contacts
    }

    /// Records a peer which has just been seen alive. A full bucket is
    /// resolved in the background.
    fn observe_peer(self: &Arc<Self>, peer: Contact) {
        let lru = match self.routing_table.lock().add(peer) {
            AddResult::Full { lru } => lru,
            _ => return,
        };

        let this = self.clone();
        if !self.tasks.try_spawn(async move {
            this.evict(lru, peer).await;
        }) {
            tracing::debug!(%peer, "no room for an eviction ping");
        }
    }

    async fn add_peer(&self, peer: Contact) -> bool {
        let res = self.routing_table.lock().add(peer);
        match res {
            AddResult::Inserted | AddResult::Updated => true,
            AddResult::Local => false,
            AddResult::Full { lru } => self.evict(lru, peer).await,
        }
    }

    /// Pings the least recently used member of a full bucket. A responsive
    /// member is kept and promoted, a silent one is replaced with `peer`.
    async fn evict(&self, lru: Contact, peer: Contact) -> bool {
        if self.ping(&lru).await {
            self.routing_table.lock().promote(&lru.id);
            tracing::debug!(%lru, dropped = %peer, "kept responsive peer");
            false
        } else {
            let res = self.routing_table.lock().replace(&lru.id, peer);
            tracing::debug!(evicted = %lru, %peer, "replaced unresponsive peer");
            matches!(res, AddResult::Inserted | AddResult::Updated)
        }
    }

    async fn ping(&self, peer: &Contact) -> bool {
        matches!(
            self.request(peer, &Message::Ping).await,
            Some(Message::PingAck)
        )
    }

    /// Sends a request and waits for the reply from the same peer.
    async fn request(&self, peer: &Contact, request: &Message) -> Option<Message> {
        let target = peer.socket_addr(self.config.port);
        let socket = self.bind_ephemeral(peer).await?;

        if let Err(e) = socket.send_to(&request.encode(), target).await {
            tracing::debug!(%peer, "failed to send request: {e}");
            return None;
        }

        let mut buffer = vec![0; self.config.max_datagram_size];
        let recv = async {
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, from)) if from == target => {
                        break Ok::<_, io::Error>(Bytes::copy_from_slice(&buffer[..len]));
                    }
                    Ok((_, from)) => {
                        tracing::trace!(%from, %peer, "ignored datagram from unexpected address");
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        let reply = match tokio::time::timeout(self.config.request_timeout, recv).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::debug!(%peer, kind = ?request.kind(), "failed to receive reply: {e}");
                return None;
            }
            Err(_) => {
                tracing::debug!(%peer, kind = ?request.kind(), "request timed out");
                return None;
            }
        };

        match Message::decode(reply) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::debug!(%peer, "malformed reply: {e}");
                None
            }
        }
    }

    /// Fire-and-forget delivery.
    async fn send(&self, peer: &Contact, message: &Message) {
        let Some(socket) = self.bind_ephemeral(peer).await else {
            return;
        };
        let target = peer.socket_addr(self.config.port);
        if let Err(e) = socket.send_to(&message.encode(), target).await {
            tracing::debug!(%peer, kind = ?message.kind(), "failed to send message: {e}");
        }
    }

    async fn bind_ephemeral(&self, peer: &Contact) -> Option<T::Socket> {
        let addr = SocketAddrV4::new(self.local.ip, 0);
        match self.transport.bind(addr).await {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::debug!(%peer, "failed to bind request socket: {e}");
                None
            }
        }
    }
}

impl<T: Transport> Drop for DhtInner<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
