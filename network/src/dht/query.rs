use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use kadnode_util::FastHashSet;

use crate::dht::DhtInner;
use crate::proto::Message;
use crate::transport::Transport;
use crate::types::{CandidateSet, Contact, KadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupMode {
    Node,
    Data,
}

pub(crate) enum LookupOutcome {
    /// Up to `k` visited peers closest to the target.
    Closest(Vec<Contact>),
    /// Some peer replied with the value.
    Found { value: Bytes, holder: Contact },
}

pub(crate) enum QueryReply {
    Contacts(Vec<Contact>),
    Value(Bytes),
}

/// Iterative search for the peers closest to a target.
///
/// Each round queries the closest unvisited peers: `alpha` of them normally,
/// up to `k` right after a round that brought no peer closer than the best
/// visited one. Peers which fail to reply are dropped for good.
pub(crate) struct Lookup<'a, T: Transport> {
    dht: &'a Arc<DhtInner<T>>,
    target: KadId,
    mode: LookupMode,
    visited: CandidateSet,
    unvisited: CandidateSet,
    failed: FastHashSet<KadId>,
}

impl<'a, T: Transport> Lookup<'a, T> {
    pub fn new(dht: &'a Arc<DhtInner<T>>, target: KadId, mode: LookupMode) -> Self {
        Self {
            dht,
            target,
            mode,
            visited: CandidateSet::new(target),
            unvisited: CandidateSet::new(target),
            failed: Default::default(),
        }
    }

    pub async fn run(mut self) -> LookupOutcome {
        let max_k = self.dht.config.max_k;

        let seed = self.dht.routing_table.lock().closest(&self.target, max_k);
        if seed.is_empty() {
            tracing::debug!("no known peers to start the lookup from");
            return LookupOutcome::Closest(Vec::new());
        }
        self.unvisited.append(seed);

        let mut wide = false;
        let mut round = 0usize;
        loop {
            self.sort();
            if self.is_finished(max_k) {
                break;
            }

            round += 1;
            let best_visited = self.visited.first().map(|item| item.distance);
            let batch = self.next_batch(wide);
            tracing::trace!(round, wide, batch = batch.len(), "lookup round");

            let dht = self.dht;
            let mode = self.mode;
            let target = self.target;
            let mut replies = batch
                .into_iter()
                .map(|peer| async move { (peer, dht.query(mode, &peer, &target).await) })
                .collect::<FuturesUnordered<_>>();

            let mut improved = false;
            while let Some((peer, reply)) = replies.next().await {
                match reply {
                    None => self.mark_failed(&peer),
                    Some(QueryReply::Value(value)) => {
                        tracing::debug!(round, %peer, "value found");
                        return LookupOutcome::Found {
                            value,
                            holder: peer,
                        };
                    }
                    Some(QueryReply::Contacts(contacts)) => {
                        improved |= self.add_reply(peer, contacts, best_visited);
                    }
                }
            }

            wide = !improved;
        }

        tracing::debug!(
            rounds = round,
            visited = self.visited.len(),
            failed = self.failed.len(),
            "lookup finished"
        );
        LookupOutcome::Closest(self.visited.first_n(max_k))
    }

    fn sort(&mut self) {
        self.unvisited.sort();
        self.visited.sort();
    }

    /// Closest unvisited peers to query next: `alpha` of them, or `k` in a
    /// wide round.
    fn next_batch(&self, wide: bool) -> Vec<Contact> {
        let config = &self.dht.config;
        self.unvisited
            .first_n(if wide { config.max_k } else { config.alpha })
    }

    fn mark_failed(&mut self, peer: &Contact) {
        self.unvisited.remove(&peer.id);
        self.failed.insert(peer.id);
    }

    /// Marks `peer` visited and queues the new contacts from its reply.
    /// Returns whether the reply brought a contact closer than `best_visited`.
    fn add_reply(
        &mut self,
        peer: Contact,
        contacts: Vec<Contact>,
        best_visited: Option<KadId>,
    ) -> bool {
        self.unvisited.remove(&peer.id);
        self.visited.append_unique([peer]);

        let local_id = self.dht.local.id;
        let mut improved = false;
        for contact in contacts {
            if contact.id == local_id {
                continue;
            }

            let distance = contact.id.distance(&self.target);
            if best_visited.is_none_or(|best| distance < best) {
                improved = true;
            }

            if !self.failed.contains(&contact.id)
                && !self.visited.contains(&contact.id)
                && !self.unvisited.contains(&contact.id)
            {
                self.unvisited.append([contact]);
            }
        }
        improved
    }

    /// Done when nothing is left to query or when the `k` closest visited
    /// peers are all closer than any unvisited one.
    fn is_finished(&self, max_k: usize) -> bool {
        let Some(closest_unvisited) = self.unvisited.first() else {
            return true;
        };
        match self.visited.get(max_k - 1) {
            Some(kth_visited) => kth_visited.distance < closest_unvisited.distance,
            None => false,
        }
    }
}

impl<T: Transport> DhtInner<T> {
    async fn query(
        self: &Arc<Self>,
        mode: LookupMode,
        peer: &Contact,
        target: &KadId,
    ) -> Option<QueryReply> {
        let request = match mode {
            LookupMode::Node => Message::FindNode {
                requester: self.local.id,
                target: *target,
            },
            LookupMode::Data => Message::FindData {
                requester: self.local.id,
                key: *target,
            },
        };

        let reply = match (mode, self.request(peer, &request).await?) {
            (LookupMode::Node, Message::FindNodeAck { contacts })
            | (LookupMode::Data, Message::FindDataFail { contacts }) => {
                QueryReply::Contacts(contacts)
            }
            (LookupMode::Data, Message::FindDataSuccess { value }) => QueryReply::Value(value),
            (_, reply) => {
                tracing::debug!(%peer, kind = ?reply.kind(), "unexpected reply");
                return None;
            }
        };

        self.observe_peer(*peer);
        Some(reply)
    }
}
