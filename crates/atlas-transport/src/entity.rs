use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};

pub const MAX_METADATA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.z.to_le_bytes());
    }

    fn read(buf: &[u8], cursor: &mut usize) -> TransportResult<Self> {
        if buf.len() < *cursor + 12 {
            return Err(TransportError::Truncated { expected: *cursor + 12, actual: buf.len() });
        }
        let x = f32::from_le_bytes(buf[*cursor..*cursor + 4].try_into().unwrap());
        let y = f32::from_le_bytes(buf[*cursor + 4..*cursor + 8].try_into().unwrap());
        let z = f32::from_le_bytes(buf[*cursor + 8..*cursor + 12].try_into().unwrap());
        *cursor += 12;
        Ok(Self { x, y, z })
    }
}

/// Axis-aligned bounding box. `min <= max` componentwise is an invariant of
/// every constructor; callers that mutate fields directly must preserve it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn centered(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            min: Vec3::new(center.x - half_extent.x, center.y - half_extent.y, center.z - half_extent.z),
            max: Vec3::new(center.x + half_extent.x, center.y + half_extent.y, center.z + half_extent.z),
        }
    }

    pub fn contains_xy(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.min.write(out);
        self.max.write(out);
    }

    fn read(buf: &[u8], cursor: &mut usize) -> TransportResult<Self> {
        let min = Vec3::read(buf, cursor)?;
        let max = Vec3::read(buf, cursor)?;
        Ok(Self { min, max })
    }
}

/// A simulated object with position and metadata, transferable across shards
/// without renaming. `entity_id` is globally unique and shard-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasEntity {
    pub entity_id: u64,
    pub client_id: Uuid,
    pub is_client: bool,
    pub world: u16,
    pub position: Vec3,
    pub bounding_box: Aabb,
    pub metadata: Vec<u8>,
}

impl AtlasEntity {
    pub fn serialize(&self, out: &mut Vec<u8>) -> TransportResult<()> {
        if self.metadata.len() > MAX_METADATA_BYTES {
            return Err(TransportError::MetadataTooLarge {
                max: MAX_METADATA_BYTES,
                actual: self.metadata.len(),
            });
        }
        out.extend_from_slice(&self.entity_id.to_le_bytes());
        out.extend_from_slice(&self.world.to_le_bytes());
        self.position.write(out);
        self.bounding_box.write(out);
        out.push(self.is_client as u8);
        out.extend_from_slice(self.client_id.as_bytes());
        out.extend_from_slice(&(self.metadata.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.metadata);
        Ok(())
    }

    pub fn deserialize(buf: &[u8], cursor: &mut usize) -> TransportResult<Self> {
        let need = *cursor + 8 + 2 + 12 + 24 + 1 + 16 + 4;
        if buf.len() < need {
            return Err(TransportError::Truncated { expected: need, actual: buf.len() });
        }
        let entity_id = u64::from_le_bytes(buf[*cursor..*cursor + 8].try_into().unwrap());
        *cursor += 8;
        let world = u16::from_le_bytes(buf[*cursor..*cursor + 2].try_into().unwrap());
        *cursor += 2;
        let position = Vec3::read(buf, cursor)?;
        let bounding_box = Aabb::read(buf, cursor)?;
        let is_client = buf[*cursor] != 0;
        *cursor += 1;
        let mut client_raw = [0u8; 16];
        client_raw.copy_from_slice(&buf[*cursor..*cursor + 16]);
        *cursor += 16;
        let client_id = Uuid::from_bytes(client_raw);
        let meta_len = u32::from_le_bytes(buf[*cursor..*cursor + 4].try_into().unwrap()) as usize;
        *cursor += 4;
        if meta_len > MAX_METADATA_BYTES {
            return Err(TransportError::MetadataTooLarge { max: MAX_METADATA_BYTES, actual: meta_len });
        }
        if buf.len() < *cursor + meta_len {
            return Err(TransportError::Truncated { expected: *cursor + meta_len, actual: buf.len() });
        }
        let metadata = buf[*cursor..*cursor + meta_len].to_vec();
        *cursor += meta_len;
        Ok(Self { entity_id, client_id, is_client, world, position, bounding_box, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> AtlasEntity {
        AtlasEntity {
            entity_id: 42,
            client_id: Uuid::new_v4(),
            is_client: true,
            world: 1,
            position: Vec3::new(1.0, 2.0, 3.0),
            bounding_box: Aabb::centered(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.5, 0.5)),
            metadata: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn round_trips_through_wire_bytes() {
        let e = sample_entity();
        let mut buf = Vec::new();
        e.serialize(&mut buf).unwrap();
        let mut cursor = 0;
        let decoded = AtlasEntity::deserialize(&buf, &mut cursor).unwrap();
        assert_eq!(e, decoded);
        assert_eq!(cursor, buf.len());
    }

    #[test]
    fn rejects_oversized_metadata() {
        let mut e = sample_entity();
        e.metadata = vec![0u8; MAX_METADATA_BYTES + 1];
        let mut buf = Vec::new();
        assert!(matches!(e.serialize(&mut buf), Err(TransportError::MetadataTooLarge { .. })));
    }

    #[test]
    fn aabb_contains_xy_is_inclusive_of_bounds() {
        let b = Aabb { min: Vec3::new(0.0, 0.0, 0.0), max: Vec3::new(10.0, 10.0, 0.0) };
        assert!(b.contains_xy(Vec3::new(10.0, 10.0, 0.0)));
        assert!(!b.contains_xy(Vec3::new(10.1, 0.0, 0.0)));
    }
}
