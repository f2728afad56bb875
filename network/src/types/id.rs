use std::net::Ipv4Addr;
use std::str::FromStr;

use rand::Rng;

/// Identifier width in bytes.
pub const ID_LEN: usize = 20;
/// Identifier width in bits. Also the number of routing table buckets.
pub const ID_BITS: usize = ID_LEN * 8;

/// A 160-bit identifier of a peer or of a stored value.
///
/// Ordering is bytewise (most significant byte first), so comparing two
/// distances produced by [`KadId::distance`] answers "which one is closer".
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct KadId(pub [u8; ID_LEN]);

impl KadId {
    pub const ZERO: Self = Self([0; ID_LEN]);

    /// SHA-1 of the content.
    pub fn from_content(data: &[u8]) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, data);
        let mut id = Self::ZERO;
        id.0.copy_from_slice(digest.as_ref());
        id
    }

    /// SHA-1 of the dotted-decimal representation of the address.
    pub fn from_address(addr: &Ipv4Addr) -> Self {
        Self::from_content(addr.to_string().as_bytes())
    }

    pub fn random() -> Self {
        rand::random()
    }

    pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, hex::FromHexError> {
        let mut id = Self::ZERO;
        hex::decode_to_slice(hex, &mut id.0).map(|_| id)
    }

    /// XOR metric. Symmetric, zero only for equal identifiers.
    pub fn distance(&self, other: &Self) -> Self {
        let mut result = Self::ZERO;
        for (r, (a, b)) in result.0.iter_mut().zip(self.0.iter().zip(&other.0)) {
            *r = a ^ b;
        }
        result
    }

    /// Number of leading bits shared with `other` (`ID_BITS` for equal ids).
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.distance(other).leading_zeros()
    }

    pub fn leading_zeros(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_BITS
    }

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl rand::distr::Distribution<KadId> for rand::distr::StandardUniform {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> KadId {
        KadId(rng.random())
    }
}

impl std::fmt::Display for KadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = f.precision().unwrap_or(ID_LEN);
        for byte in self.0.iter().take(len) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KadId({self})")
    }
}

impl FromStr for KadId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for KadId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> serde::Deserialize<'de> for KadId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(kadnode_util::serde_helpers::StrVisitor::new())
        } else {
            <[u8; ID_LEN]>::deserialize(deserializer).map(Self)
        }
    }
}
