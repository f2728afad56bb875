pub use dht::{
    AddResult, ConfigError, Dht, DhtBuilder, DhtConfig, JoinError, RoutingTable, Storage,
    StoreError, ValueLookup,
};
pub use proto::{Message, MessageKind, ProtoError};
pub use transport::{MemoryNetwork, MemorySocket, MemoryTransport, Socket, Transport, UdpTransport};
pub use types::{Candidate, CandidateSet, Contact, ID_BITS, ID_LEN, KadId};

mod dht;
mod types;
mod util;

pub mod proto;
pub mod transport;
