use std::net::{Ipv4Addr, SocketAddrV4};

use kadnode_util::FastHashSet;
use serde::{Deserialize, Serialize};

use crate::types::KadId;

/// A known peer: its identifier and the address it listens on.
///
/// All peers of a network share the same DHT port, so only the IP is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub id: KadId,
    pub ip: Ipv4Addr,
}

impl Contact {
    pub fn new(id: KadId, ip: Ipv4Addr) -> Self {
        Self { id, ip }
    }

    /// Contact of a peer known only by its address.
    pub fn from_address(ip: Ipv4Addr) -> Self {
        Self {
            id: KadId::from_address(&ip),
            ip,
        }
    }

    pub fn socket_addr(&self, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, port)
    }
}

impl std::fmt::Display for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}@{}", self.id, self.ip)
    }
}

/// A contact together with its distance to the target of a [`CandidateSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub distance: KadId,
    pub contact: Contact,
}

/// Working set of contacts ordered by distance to a fixed target.
///
/// Distances are computed once on insertion and live only here.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    target: KadId,
    items: Vec<Candidate>,
    ids: FastHashSet<KadId>,
}

impl CandidateSet {
    pub fn new(target: KadId) -> Self {
        Self {
            target,
            items: Vec::new(),
            ids: Default::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Bulk insert without a membership check.
    ///
    /// The caller must ensure that the contacts are not in the set yet.
    pub fn append<I>(&mut self, contacts: I)
    where
        I: IntoIterator<Item = Contact>,
    {
        for contact in contacts {
            self.ids.insert(contact.id);
            self.items.push(self.make_candidate(contact));
        }
    }

    /// Inserts contacts whose identifiers are not in the set yet.
    /// Returns the number of inserted contacts.
    pub fn append_unique<I>(&mut self, contacts: I) -> usize
    where
        I: IntoIterator<Item = Contact>,
    {
        let mut added = 0;
        for contact in contacts {
            if self.ids.insert(contact.id) {
                self.items.push(self.make_candidate(contact));
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, id: &KadId) -> bool {
        self.ids.contains(id)
    }

    pub fn remove(&mut self, id: &KadId) -> Option<Contact> {
        if !self.ids.remove(id) {
            return None;
        }
        let index = self.items.iter().position(|item| &item.contact.id == id)?;
        Some(self.items.remove(index).contact)
    }

    /// Orders items by ascending distance to the target, keeping the
    /// insertion order of equal distances.
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.distance.cmp(&b.distance));
    }

    /// The first `n` contacts in the current order.
    pub fn first_n(&self, n: usize) -> Vec<Contact> {
        self.items.iter().take(n).map(|item| item.contact).collect()
    }

    pub fn first(&self) -> Option<&Candidate> {
        self.items.first()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.items.get(index)
    }

    fn make_candidate(&self, contact: Contact) -> Candidate {
        Candidate {
            distance: contact.id.distance(&self.target),
            contact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(first_byte: u8) -> Contact {
        let mut id = KadId::ZERO;
        id.0[0] = first_byte;
        Contact::new(id, Ipv4Addr::new(10, 0, 0, first_byte))
    }

    #[test]
    fn sorted_by_distance_to_target() {
        let mut set = CandidateSet::new(KadId::ZERO);
        set.append([contact(0x40), contact(0x01), contact(0x80), contact(0x02)]);
        set.sort();

        let order = set
            .first_n(10)
            .into_iter()
            .map(|c| c.id.0[0])
            .collect::<Vec<_>>();
        assert_eq!(order, [0x01, 0x02, 0x40, 0x80]);

        assert_eq!(set.first_n(2).len(), 2);
        assert_eq!(set.first().map(|c| c.contact), Some(contact(0x01)));
    }

    #[test]
    fn unique_append_deduplicates_by_id() {
        let mut set = CandidateSet::new(KadId::random());
        assert_eq!(set.append_unique([contact(1), contact(2)]), 2);

        let mut moved = contact(1);
        moved.ip = Ipv4Addr::new(192, 168, 0, 1);
        assert_eq!(set.append_unique([moved, contact(3)]), 1);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&moved.id));
    }

    #[test]
    fn remove_by_id() {
        let mut set = CandidateSet::new(KadId::ZERO);
        set.append([contact(1), contact(2)]);

        assert_eq!(set.remove(&contact(1).id), Some(contact(1)));
        assert_eq!(set.remove(&contact(1).id), None);
        assert!(!set.contains(&contact(1).id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn distance_is_relative_to_target() {
        let mut target = KadId::ZERO;
        target.0[0] = 0x80;

        let mut set = CandidateSet::new(target);
        set.append([contact(0x01), contact(0x81)]);
        set.sort();

        assert_eq!(set.first().map(|c| c.contact), Some(contact(0x81)));
        assert_eq!(set.get(1).map(|c| c.distance.0[0]), Some(0x81));
    }
}
