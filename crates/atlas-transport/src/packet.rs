use log::warn;

use crate::entity::AtlasEntity;
use crate::error::{TransportError, TransportResult};
use crate::identity::NetworkIdentity;

pub type PacketTypeId = u16;

pub const GENERIC_ENTITY_PACKET_TYPE: PacketTypeId = 1;
pub const CURRENT_PROTOCOL_VERSION: u8 = 2;

/// Handoff packet: a full entity snapshot addressed to the shard that should
/// adopt it at `transfer_time_us`. `sent_at_ms` is wallclock, used only for
/// diagnostics; `transfer_time_us` is the field shards actually agree on.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericEntityPacket {
    pub sender: NetworkIdentity,
    pub entity: AtlasEntity,
    pub protocol_version: u8,
    pub transfer_time_us: u64,
    pub sent_at_ms: u64,
}

impl GenericEntityPacket {
    pub fn new(sender: NetworkIdentity, entity: AtlasEntity, transfer_time_us: u64, sent_at_ms: u64) -> Self {
        Self { sender, entity, protocol_version: CURRENT_PROTOCOL_VERSION, transfer_time_us, sent_at_ms }
    }

    fn encode_payload(&self) -> TransportResult<Vec<u8>> {
        let mut out = Vec::new();
        self.sender.serialize(&mut out);
        self.entity.serialize(&mut out)?;
        out.push(self.protocol_version);
        out.extend_from_slice(&self.transfer_time_us.to_le_bytes());
        out.extend_from_slice(&self.sent_at_ms.to_le_bytes());
        Ok(out)
    }

    fn decode_payload(buf: &[u8]) -> TransportResult<Self> {
        let mut cursor = 0usize;
        let sender = NetworkIdentity::deserialize(buf, &mut cursor)?;
        if sender.is_invalid() {
            return Err(TransportError::InvalidSender);
        }
        let entity = AtlasEntity::deserialize(buf, &mut cursor)?;
        if buf.len() < cursor + 1 + 8 + 8 {
            return Err(TransportError::Truncated { expected: cursor + 17, actual: buf.len() });
        }
        let protocol_version = buf[cursor];
        cursor += 1;
        if protocol_version != CURRENT_PROTOCOL_VERSION {
            warn!("accepting packet with unexpected protocol_version {protocol_version} (current is {CURRENT_PROTOCOL_VERSION})");
        }
        let transfer_time_us = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let sent_at_ms = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        Ok(Self { sender, entity, protocol_version, transfer_time_us, sent_at_ms })
    }

    /// Encodes the full wire frame: `{packet_type_id:u16}{length:u32}{payload}`.
    pub fn encode_frame(&self) -> TransportResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut frame = Vec::with_capacity(payload.len() + 6);
        frame.extend_from_slice(&GENERIC_ENTITY_PACKET_TYPE.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decodes a full wire frame, validating the type id and declared length.
    pub fn decode_frame(frame: &[u8]) -> TransportResult<Self> {
        if frame.len() < 6 {
            return Err(TransportError::Truncated { expected: 6, actual: frame.len() });
        }
        let type_id = u16::from_le_bytes(frame[0..2].try_into().unwrap());
        if type_id != GENERIC_ENTITY_PACKET_TYPE {
            return Err(TransportError::UnknownPacketType(type_id));
        }
        let len = u32::from_le_bytes(frame[2..6].try_into().unwrap()) as usize;
        if frame.len() < 6 + len {
            return Err(TransportError::Truncated { expected: 6 + len, actual: frame.len() });
        }
        Self::decode_payload(&frame[6..6 + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Aabb, Vec3};
    use uuid::Uuid;

    fn sample_packet() -> GenericEntityPacket {
        GenericEntityPacket::new(
            NetworkIdentity::make_shard(Uuid::new_v4()),
            AtlasEntity {
                entity_id: 7,
                client_id: Uuid::new_v4(),
                is_client: false,
                world: 0,
                position: Vec3::new(-1.0, 0.0, 0.0),
                bounding_box: Aabb::centered(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)),
                metadata: vec![],
            },
            123_456,
            789,
        )
    }

    #[test]
    fn round_trips_frame() {
        let p = sample_packet();
        let frame = p.encode_frame().unwrap();
        let decoded = GenericEntityPacket::decode_frame(&frame).unwrap();
        assert_eq!(p, decoded);
    }

    #[test]
    fn rejects_invalid_sender() {
        let mut p = sample_packet();
        p.sender = NetworkIdentity::invalid();
        let frame = p.encode_frame().unwrap();
        assert!(matches!(GenericEntityPacket::decode_frame(&frame), Err(TransportError::InvalidSender)));
    }

    #[test]
    fn rejects_wrong_type_id() {
        let mut frame = sample_packet().encode_frame().unwrap();
        frame[0..2].copy_from_slice(&99u16.to_le_bytes());
        assert!(matches!(
            GenericEntityPacket::decode_frame(&frame),
            Err(TransportError::UnknownPacketType(99))
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = sample_packet().encode_frame().unwrap();
        assert!(GenericEntityPacket::decode_frame(&frame[..frame.len() - 4]).is_err());
    }

    #[test]
    fn unexpected_protocol_version_is_accepted_not_rejected() {
        let mut p = sample_packet();
        p.protocol_version = CURRENT_PROTOCOL_VERSION + 1;
        let frame = p.encode_frame().unwrap();
        let decoded = GenericEntityPacket::decode_frame(&frame).unwrap();
        assert_eq!(decoded.protocol_version, CURRENT_PROTOCOL_VERSION + 1);
    }
}
