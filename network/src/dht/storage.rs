use std::time::Duration;

use bytes::Bytes;
use kadnode_util::FastHashMap;
use parking_lot::Mutex;

use crate::types::{Contact, KadId};

/// In-memory content-addressed values with a per-entry time to live.
///
/// Values and their TTLs share one lock. Remembered holders of locally
/// stored values are guarded separately since the refresh loop walks them
/// while new stores arrive.
pub struct Storage {
    values: Mutex<StoredValues>,
    remembered: Mutex<FastHashMap<KadId, Vec<Contact>>>,
    ttl: Duration,
    max_value_len: usize,
    max_remembered: usize,
}

#[derive(Default)]
struct StoredValues {
    data: FastHashMap<KadId, Bytes>,
    ttl: FastHashMap<KadId, Duration>,
}

impl Storage {
    pub fn new(ttl: Duration, max_value_len: usize, max_remembered: usize) -> Self {
        Self {
            values: Default::default(),
            remembered: Default::default(),
            ttl,
            max_value_len,
            max_remembered,
        }
    }

    pub fn max_value_len(&self) -> usize {
        self.max_value_len
    }

    pub fn check_value(&self, value: &[u8]) -> Result<(), StoreError> {
        if value.is_empty() {
            Err(StoreError::EmptyValue)
        } else if value.len() > self.max_value_len {
            Err(StoreError::ValueTooBig {
                len: value.len(),
                max: self.max_value_len,
            })
        } else {
            Ok(())
        }
    }

    /// Returns `true` if the value was not stored before.
    ///
    /// Storing a known key keeps the original bytes and only resets its TTL.
    pub fn insert(&self, key: KadId, value: Bytes) -> Result<bool, StoreError> {
        self.check_value(&value)?;

        let mut values = self.values.lock();
        values.ttl.insert(key, self.ttl);
        Ok(match values.data.entry(key) {
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        })
    }

    pub fn get(&self, key: &KadId) -> Option<Bytes> {
        self.values.lock().data.get(key).cloned()
    }

    pub fn contains(&self, key: &KadId) -> bool {
        self.values.lock().data.contains_key(key)
    }

    pub fn remaining_ttl(&self, key: &KadId) -> Option<Duration> {
        self.values.lock().ttl.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().data.is_empty()
    }

    /// Resets the TTL of a live entry. Returns `false` if there is none.
    pub fn refresh(&self, key: &KadId) -> bool {
        match self.values.lock().ttl.get_mut(key) {
            Some(ttl) => {
                *ttl = self.ttl;
                true
            }
            None => false,
        }
    }

    /// Subtracts `elapsed` from every TTL and drops the entries that ran out.
    /// Returns the number of removed entries.
    pub fn expire(&self, elapsed: Duration) -> usize {
        let mut values = self.values.lock();
        let StoredValues { data, ttl } = &mut *values;

        let before = data.len();
        ttl.retain(|key, remaining| {
            *remaining = remaining.saturating_sub(elapsed);
            if remaining.is_zero() {
                data.remove(key);
                false
            } else {
                true
            }
        });
        before - data.len()
    }

    /// Remembers which peers were asked to hold a locally stored value.
    pub fn remember(&self, key: KadId, mut holders: Vec<Contact>) {
        holders.truncate(self.max_remembered);
        self.remembered.lock().insert(key, holders);
    }

    /// Drops the remembered holders. The value itself stays until its TTL lapses.
    pub fn forget(&self, key: &KadId) -> bool {
        self.remembered.lock().remove(key).is_some()
    }

    pub fn remembered(&self, key: &KadId) -> Option<Vec<Contact>> {
        self.remembered.lock().get(key).cloned()
    }

    pub(crate) fn remembered_snapshot(&self) -> Vec<(KadId, Vec<Contact>)> {
        self.remembered
            .lock()
            .iter()
            .map(|(key, holders)| (*key, holders.clone()))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("empty value")]
    EmptyValue,
    #[error("value too big: {len} bytes (max {max})")]
    ValueTooBig { len: usize, max: usize },
}
