use std::collections::{HashMap, HashSet};

pub mod futures;
pub mod serde_helpers;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "test")]
pub mod test;

pub type FastHashMap<K, V> = HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = HashSet<K, ahash::RandomState>;
