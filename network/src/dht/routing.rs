use std::collections::BTreeMap;

use kadnode_util::FastHashMap;

use crate::types::{CandidateSet, Contact, ID_BITS, KadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// A new contact was placed at the most recently used position.
    Inserted,
    /// A known contact was promoted to the most recently used position.
    Updated,
    /// The bucket is full. The least recently used member must be pinged
    /// before the new contact can take its place.
    Full { lru: Contact },
    /// The local peer is never stored in the table.
    Local,
}

pub struct RoutingTable {
    local: Contact,
    max_k: usize,
    buckets: Box<[Bucket]>,
}

impl RoutingTable {
    /// # Panics
    ///
    /// Panics if `max_k` is zero.
    pub fn new(local: Contact, max_k: usize) -> Self {
        assert!(max_k > 0, "bucket capacity must be positive");
        Self {
            local,
            max_k,
            buckets: (0..ID_BITS).map(|_| Bucket::default()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    /// Index of the first bit in which `id` differs from the local id.
    /// The local id itself maps to the last bucket.
    pub fn bucket_index(&self, id: &KadId) -> usize {
        self.local.id.common_prefix_len(id).min(ID_BITS - 1)
    }

    pub fn bucket_len(&self, index: usize) -> usize {
        self.buckets.get(index).map(Bucket::len).unwrap_or_default()
    }

    pub fn add(&mut self, contact: Contact) -> AddResult {
        if contact.id == self.local.id {
            return AddResult::Local;
        }

        let index = self.bucket_index(&contact.id);
        self.buckets[index].add(contact, self.max_k)
    }

    /// Moves a known contact to the most recently used position.
    pub fn promote(&mut self, id: &KadId) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].touch(id)
    }

    /// Evicts `lru` (if still present) and adds `contact` in its place.
    pub fn replace(&mut self, lru: &KadId, contact: Contact) -> AddResult {
        let index = self.bucket_index(lru);
        self.buckets[index].remove(lru);
        self.add(contact)
    }

    pub fn remove(&mut self, id: &KadId) -> Option<Contact> {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    pub fn contains(&self, id: &KadId) -> bool {
        self.buckets[self.bucket_index(id)].contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.iter().flat_map(Bucket::contents)
    }

    /// Up to `count` known contacts closest to `target`, ascending by distance.
    ///
    /// Starts from the bucket the target falls into and widens the search to
    /// the neighbouring buckets on both sides until enough contacts are found.
    pub fn closest(&self, target: &KadId, count: usize) -> Vec<Contact> {
        if count == 0 {
            return Vec::new();
        }

        let start = self.bucket_index(target);
        let mut pool = CandidateSet::new(*target);
        pool.append(self.buckets[start].contents().copied());

        let mut offset = 1;
        while pool.len() < count && (offset <= start || start + offset < ID_BITS) {
            if let Some(index) = start.checked_sub(offset) {
                pool.append(self.buckets[index].contents().copied());
            }
            if let Some(bucket) = self.buckets.get(start + offset) {
                pool.append(bucket.contents().copied());
            }
            offset += 1;
        }

        pool.sort();
        pool.first_n(count)
    }
}

/// Contacts of one distance range in LRU order.
///
/// Every touch assigns a fresh sequence number, so the first entry of
/// `entries` is always the least recently used one.
#[derive(Default)]
struct Bucket {
    entries: BTreeMap<u64, Contact>,
    index: FastHashMap<KadId, u64>,
    next_seq: u64,
}

impl Bucket {
    fn add(&mut self, contact: Contact, max_k: usize) -> AddResult {
        if self.touch(&contact.id) {
            return AddResult::Updated;
        }

        match self.entries.first_key_value() {
            Some((_, lru)) if self.entries.len() >= max_k => {
                return AddResult::Full { lru: *lru };
            }
            _ => {}
        }

        let seq = self.bump();
        self.index.insert(contact.id, seq);
        self.entries.insert(seq, contact);
        AddResult::Inserted
    }

    fn touch(&mut self, id: &KadId) -> bool {
        let Some(old_seq) = self.index.get(id).copied() else {
            return false;
        };
        let Some(contact) = self.entries.remove(&old_seq) else {
            return false;
        };

        let seq = self.bump();
        self.entries.insert(seq, contact);
        self.index.insert(*id, seq);
        true
    }

    fn remove(&mut self, id: &KadId) -> Option<Contact> {
        let seq = self.index.remove(id)?;
        self.entries.remove(&seq)
    }

    fn contains(&self, id: &KadId) -> bool {
        self.index.contains_key(id)
    }

    /// Most recently used first.
    fn contents(&self) -> impl Iterator<Item = &Contact> {
        self.entries.values().rev()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use super::*;

    const MAX_K: usize = 20;

    fn make_contact(id: KadId) -> Contact {
        Contact::new(id, Ipv4Addr::new(10, 0, 0, id.0[19]))
    }

    /// An id whose first `prefix` bits match `local` and the next one differs.
    fn id_in_bucket(local: &KadId, prefix: usize) -> KadId {
        let mut id = KadId::random();
        for bit in 0..=prefix {
            let byte = bit / 8;
            let mask = 0x80 >> (bit % 8);
            let local_bit = local.0[byte] & mask;
            let value = if bit == prefix { local_bit ^ mask } else { local_bit };
            id.0[byte] = (id.0[byte] & !mask) | value;
        }
        id
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(make_contact(KadId::random()), MAX_K);

        let peer = make_contact(KadId::random());
        assert_eq!(table.add(peer), AddResult::Inserted);
        assert_eq!(table.add(peer), AddResult::Updated);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&peer.id));
    }

    #[test]
    fn should_not_add_self() {
        let local = make_contact(KadId::random());
        let mut table = RoutingTable::new(local, MAX_K);

        assert_eq!(table.add(local), AddResult::Local);
        assert!(table.is_empty());
    }

    #[test]
    fn local_id_maps_to_last_bucket() {
        let local = KadId::random();
        let table = RoutingTable::new(make_contact(local), MAX_K);
        assert_eq!(table.bucket_index(&local), ID_BITS - 1);

        for prefix in [0, 7, 8, 100, ID_BITS - 1] {
            assert_eq!(table.bucket_index(&id_in_bucket(&local, prefix)), prefix);
        }
    }

    #[test]
    fn max_k_per_bucket() {
        let k = 4;
        let mut bucket = Bucket::default();

        let contacts = (0..k)
            .map(|_| make_contact(KadId::random()))
            .collect::<Vec<_>>();
        for contact in &contacts {
            assert_eq!(bucket.add(*contact, k), AddResult::Inserted);
        }

        let extra = make_contact(KadId::random());
        assert_eq!(bucket.add(extra, k), AddResult::Full { lru: contacts[0] });
        assert_eq!(bucket.len(), k);
        assert!(!bucket.contains(&extra.id));

        // Known contacts are still accepted
        assert_eq!(bucket.add(contacts[0], k), AddResult::Updated);
        assert_eq!(bucket.add(extra, k), AddResult::Full { lru: contacts[1] });
    }

    #[test]
    #[should_panic(expected = "bucket capacity must be positive")]
    fn zero_capacity_is_rejected() {
        RoutingTable::new(make_contact(KadId::random()), 0);
    }

    #[test]
    fn bucket_is_mru_first() {
        let mut bucket = Bucket::default();
        let contacts = (0..3)
            .map(|_| make_contact(KadId::random()))
            .collect::<Vec<_>>();
        for contact in &contacts {
            bucket.add(*contact, MAX_K);
        }
        assert!(bucket.touch(&contacts[0].id));

        let order = bucket.contents().copied().collect::<Vec<_>>();
        assert_eq!(order, [contacts[0], contacts[2], contacts[1]]);

        assert_eq!(bucket.remove(&contacts[2].id), Some(contacts[2]));
        assert_eq!(bucket.remove(&contacts[2].id), None);
        assert!(!bucket.touch(&contacts[2].id));
    }

    #[test]
    fn replace_lru() {
        let local = KadId::random();
        let mut table = RoutingTable::new(make_contact(local), 2);

        let a = make_contact(id_in_bucket(&local, 3));
        let b = make_contact(id_in_bucket(&local, 3));
        let c = make_contact(id_in_bucket(&local, 3));
        table.add(a);
        table.add(b);

        assert_eq!(table.add(c), AddResult::Full { lru: a });
        assert_eq!(table.replace(&a.id, c), AddResult::Inserted);
        assert!(!table.contains(&a.id));
        assert!(table.contains(&c.id));
        assert_eq!(table.bucket_len(3), 2);

        assert!(table.promote(&b.id));
        assert_eq!(table.add(a), AddResult::Full { lru: c });
    }

    #[test]
    fn closest_is_sorted_and_bounded() {
        let local = KadId::random();
        let mut table = RoutingTable::new(make_contact(local), MAX_K);
        for _ in 0..200 {
            table.add(make_contact(KadId::random()));
        }

        let target = KadId::random();
        let closest = table.closest(&target, 20);
        assert_eq!(closest.len(), 20);

        let distances = closest
            .iter()
            .map(|c| c.id.distance(&target))
            .collect::<Vec<_>>();
        assert!(distances.windows(2).all(|w| w[0] < w[1]));

        assert!(table.closest(&target, 0).is_empty());
        assert_eq!(table.closest(&target, 1000).len(), table.len());
    }

    #[test]
    fn closest_expands_to_both_sides() {
        let local = KadId::from_str("bdbc554024c65b463b0f0a01037b55985190f4fc").unwrap();
        let mut table = RoutingTable::new(make_contact(local), MAX_K);

        let near = make_contact(id_in_bucket(&local, 10));
        let lower = make_contact(id_in_bucket(&local, 2));
        let upper = make_contact(id_in_bucket(&local, 50));
        for contact in [near, lower, upper] {
            table.add(contact);
        }

        let target = id_in_bucket(&local, 10);
        let closest = table.closest(&target, 3);
        assert_eq!(closest.len(), 3);
        assert!(closest.contains(&lower));
        assert!(closest.contains(&upper));

        // Contacts sharing a longer prefix with the target come first
        assert_eq!(closest, [near, upper, lower]);
        assert_eq!(table.closest(&target, 1), [near]);
    }
}
