use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};

/// Role tag carried alongside a shard/client/watchdog UUID. Maps 1:1 onto the
/// source tree's `NetworkIdentityType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NetworkIdentityType {
    Invalid = 0,
    Shard = 1,
    WatchDog = 2,
    GameClient = 3,
    GameServer = 4,
    Cartograph = 5,
}

impl NetworkIdentityType {
    fn from_u8(v: u8) -> TransportResult<Self> {
        Ok(match v {
            0 => Self::Invalid,
            1 => Self::Shard,
            2 => Self::WatchDog,
            3 => Self::GameClient,
            4 => Self::GameServer,
            5 => Self::Cartograph,
            other => {
                return Err(TransportError::MalformedPacket {
                    reason: format!("unknown NetworkIdentityType tag {other}"),
                })
            }
        })
    }

    fn label(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Shard => "shard",
            Self::WatchDog => "watchdog",
            Self::GameClient => "client",
            Self::GameServer => "gateway",
            Self::Cartograph => "cartograph",
        }
    }
}

/// Globally unique participant identity: a role tag plus a 128-bit UUID.
///
/// Ordering and hashing are both derived from the canonical string form
/// (`"{label}:{uuid}"`), not from raw bytes, so that two processes comparing
/// identities always agree regardless of endian or tuple-field order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkIdentity {
    pub kind: NetworkIdentityType,
    pub id: Uuid,
}

impl NetworkIdentity {
    pub fn invalid() -> Self {
        Self { kind: NetworkIdentityType::Invalid, id: Uuid::nil() }
    }

    pub fn make_watchdog() -> Self {
        Self { kind: NetworkIdentityType::WatchDog, id: Uuid::new_v4() }
    }

    pub fn make_shard(id: Uuid) -> Self {
        Self { kind: NetworkIdentityType::Shard, id }
    }

    pub fn make_game_server(id: Uuid) -> Self {
        Self { kind: NetworkIdentityType::GameServer, id }
    }

    pub fn make_game_client(id: Uuid) -> Self {
        Self { kind: NetworkIdentityType::GameClient, id }
    }

    pub fn make_cartograph() -> Self {
        Self { kind: NetworkIdentityType::Cartograph, id: Uuid::new_v4() }
    }

    pub fn is_internal(&self) -> bool {
        self.kind != NetworkIdentityType::GameClient
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == NetworkIdentityType::Invalid
    }

    fn canonical(&self) -> String {
        format!("{}:{}", self.kind.label(), self.id.hyphenated())
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.push(self.kind as u8);
        out.extend_from_slice(self.id.as_bytes());
    }

    pub fn deserialize(buf: &[u8], cursor: &mut usize) -> TransportResult<Self> {
        if buf.len() < *cursor + 17 {
            return Err(TransportError::Truncated { expected: *cursor + 17, actual: buf.len() });
        }
        let kind = NetworkIdentityType::from_u8(buf[*cursor])?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&buf[*cursor + 1..*cursor + 17]);
        *cursor += 17;
        Ok(Self { kind, id: Uuid::from_bytes(raw) })
    }
}

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl PartialEq for NetworkIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}
impl Eq for NetworkIdentity {}

impl PartialOrd for NetworkIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NetworkIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl std::hash::Hash for NetworkIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let id = NetworkIdentity::make_shard(Uuid::new_v4());
        let mut buf = Vec::new();
        id.serialize(&mut buf);
        let mut cursor = 0;
        let decoded = NetworkIdentity::deserialize(&buf, &mut cursor).unwrap();
        assert_eq!(id, decoded);
        assert_eq!(cursor, 17);
    }

    #[test]
    fn ordering_is_by_canonical_string_not_raw_bytes() {
        let a = NetworkIdentity { kind: NetworkIdentityType::Shard, id: Uuid::nil() };
        let b = NetworkIdentity { kind: NetworkIdentityType::WatchDog, id: Uuid::nil() };
        assert_eq!(a.cmp(&b), a.canonical().cmp(&b.canonical()));
    }

    #[test]
    fn invalid_identity_is_flagged() {
        assert!(NetworkIdentity::invalid().is_invalid());
        assert!(!NetworkIdentity::make_shard(Uuid::new_v4()).is_invalid());
    }

    #[test]
    fn game_client_is_not_internal() {
        let client = NetworkIdentity::make_game_client(Uuid::new_v4());
        assert!(!client.is_internal());
        let shard = NetworkIdentity::make_shard(Uuid::new_v4());
        assert!(shard.is_internal());
    }
}
