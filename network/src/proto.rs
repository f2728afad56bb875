//! Binary datagram layout.
//!
//! Every message starts with a one byte kind. Identifiers take
//! [`ID_LEN`] bytes, addresses are 4 byte IPv4.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{Contact, ID_LEN, KadId};

/// Most contacts a single reply can carry (count is one byte).
pub const MAX_REPLY_CONTACTS: usize = u8::MAX as usize;

/// Size of the STORE message without the value.
pub const STORE_HEADER_LEN: usize = 1 + 2 * ID_LEN;

const CONTACT_LEN: usize = ID_LEN + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Ping = 0,
    PingAck = 1,
    Store = 2,
    FindNode = 3,
    FindNodeAck = 4,
    FindData = 5,
    FindDataSuccess = 6,
    FindDataFail = 7,
    RefreshTtl = 8,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ping,
            1 => Self::PingAck,
            2 => Self::Store,
            3 => Self::FindNode,
            4 => Self::FindNodeAck,
            5 => Self::FindData,
            6 => Self::FindDataSuccess,
            7 => Self::FindDataFail,
            8 => Self::RefreshTtl,
            _ => return Err(ProtoError::UnknownKind(value)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    PingAck,
    Store {
        requester: KadId,
        key: KadId,
        value: Bytes,
    },
    FindNode {
        requester: KadId,
        target: KadId,
    },
    FindNodeAck {
        contacts: Vec<Contact>,
    },
    FindData {
        requester: KadId,
        key: KadId,
    },
    FindDataSuccess {
        value: Bytes,
    },
    FindDataFail {
        contacts: Vec<Contact>,
    },
    RefreshTtl {
        requester: KadId,
        key: KadId,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ping => MessageKind::Ping,
            Self::PingAck => MessageKind::PingAck,
            Self::Store { .. } => MessageKind::Store,
            Self::FindNode { .. } => MessageKind::FindNode,
            Self::FindNodeAck { .. } => MessageKind::FindNodeAck,
            Self::FindData { .. } => MessageKind::FindData,
            Self::FindDataSuccess { .. } => MessageKind::FindDataSuccess,
            Self::FindDataFail { .. } => MessageKind::FindDataFail,
            Self::RefreshTtl { .. } => MessageKind::RefreshTtl,
        }
    }

    /// Identifier of the peer which sent a request.
    pub fn requester(&self) -> Option<&KadId> {
        match self {
            Self::Store { requester, .. }
            | Self::FindNode { requester, .. }
            | Self::FindData { requester, .. }
            | Self::RefreshTtl { requester, .. } => Some(requester),
            _ => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());
        buffer.put_u8(self.kind() as u8);

        match self {
            Self::Ping | Self::PingAck => {}
            Self::Store {
                requester,
                key,
                value,
            } => {
                buffer.put_slice(requester.as_bytes());
                buffer.put_slice(key.as_bytes());
                buffer.put_slice(value);
            }
            Self::FindNode {
                requester,
                target: key,
            }
            | Self::FindData { requester, key }
            | Self::RefreshTtl { requester, key } => {
                buffer.put_slice(requester.as_bytes());
                buffer.put_slice(key.as_bytes());
            }
            Self::FindNodeAck { contacts } | Self::FindDataFail { contacts } => {
                let count = contacts.len().min(MAX_REPLY_CONTACTS);
                buffer.put_u8(count as u8);
                for contact in &contacts[..count] {
                    buffer.put_slice(contact.id.as_bytes());
                    buffer.put_slice(&contact.ip.octets());
                }
            }
            Self::FindDataSuccess { value } => buffer.put_slice(value),
        }

        buffer.freeze()
    }

    pub fn decode(mut packet: Bytes) -> Result<Self, ProtoError> {
        if !packet.has_remaining() {
            return Err(ProtoError::Empty);
        }
        let kind = MessageKind::try_from(packet.get_u8())?;

        let message = match kind {
            MessageKind::Ping => Self::Ping,
            MessageKind::PingAck => Self::PingAck,
            MessageKind::Store => {
                let requester = read_id(kind, &mut packet)?;
                let key = read_id(kind, &mut packet)?;
                let value = packet.split_to(packet.len());
                Self::Store {
                    requester,
                    key,
                    value,
                }
            }
            MessageKind::FindNode => Self::FindNode {
                requester: read_id(kind, &mut packet)?,
                target: read_id(kind, &mut packet)?,
            },
            MessageKind::FindData => Self::FindData {
                requester: read_id(kind, &mut packet)?,
                key: read_id(kind, &mut packet)?,
            },
            MessageKind::RefreshTtl => Self::RefreshTtl {
                requester: read_id(kind, &mut packet)?,
                key: read_id(kind, &mut packet)?,
            },
            MessageKind::FindNodeAck => Self::FindNodeAck {
                contacts: read_contacts(kind, &mut packet)?,
            },
            MessageKind::FindDataFail => Self::FindDataFail {
                contacts: read_contacts(kind, &mut packet)?,
            },
            MessageKind::FindDataSuccess => Self::FindDataSuccess {
                value: packet.split_to(packet.len()),
            },
        };

        if packet.has_remaining() {
            return Err(ProtoError::TrailingBytes {
                kind,
                len: packet.remaining(),
            });
        }
        Ok(message)
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Ping | Self::PingAck => 0,
            Self::Store { value, .. } => 2 * ID_LEN + value.len(),
            Self::FindNode { .. } | Self::FindData { .. } | Self::RefreshTtl { .. } => 2 * ID_LEN,
            Self::FindNodeAck { contacts } | Self::FindDataFail { contacts } => {
                1 + contacts.len().min(MAX_REPLY_CONTACTS) * CONTACT_LEN
            }
            Self::FindDataSuccess { value } => value.len(),
        }
    }
}

fn read_id(kind: MessageKind, packet: &mut Bytes) -> Result<KadId, ProtoError> {
    ensure_remaining(kind, packet, ID_LEN)?;
    let mut id = KadId::ZERO;
    packet.copy_to_slice(&mut id.0);
    Ok(id)
}

fn read_contacts(kind: MessageKind, packet: &mut Bytes) -> Result<Vec<Contact>, ProtoError> {
    ensure_remaining(kind, packet, 1)?;
    let count = packet.get_u8() as usize;
    ensure_remaining(kind, packet, count * CONTACT_LEN)?;

    let mut contacts = Vec::with_capacity(count);
    for _ in 0..count {
        let id = read_id(kind, packet)?;
        let ip = Ipv4Addr::from(packet.get_u32());
        contacts.push(Contact::new(id, ip));
    }
    Ok(contacts)
}

fn ensure_remaining(kind: MessageKind, packet: &Bytes, len: usize) -> Result<(), ProtoError> {
    if packet.remaining() < len {
        Err(ProtoError::UnexpectedEof {
            kind,
            expected: len,
            actual: packet.remaining(),
        })
    } else {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),
    #[error("truncated {kind:?}: expected {expected} more bytes, got {actual}")]
    UnexpectedEof {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },
    #[error("{len} trailing bytes after {kind:?}")]
    TrailingBytes { kind: MessageKind, len: usize },
}
