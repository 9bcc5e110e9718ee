//! Packet layer for AtlasNet's entity-handoff subsystem: identities, the
//! wire format, the in-process publish/subscribe bus, and peer-activity
//! tracking. The shared key-value store and actual byte transport are
//! supplied by the caller; this crate only defines what flows over them.

pub mod connection_lease;
pub mod entity;
pub mod error;
pub mod identity;
pub mod packet;
pub mod packet_bus;

pub use connection_lease::ConnectionLeaseRegistry;
pub use entity::{Aabb, AtlasEntity, Vec3};
pub use error::{TransportError, TransportResult};
pub use identity::{NetworkIdentity, NetworkIdentityType};
pub use packet::{GenericEntityPacket, PacketTypeId, CURRENT_PROTOCOL_VERSION, GENERIC_ENTITY_PACKET_TYPE};
pub use packet_bus::{PacketBus, SubscriptionHandle};
