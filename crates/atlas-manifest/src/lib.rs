//! Domain logic for AtlasNet's entity-handoff subsystem: the spatial
//! partition manifest, authority tracking, the transfer mailbox, border
//! crossing detection, the transfer watchdog, the debug owner election, and
//! the per-shard tick orchestrator that ties them together. Built on top of
//! the wire/identity layer in `atlas-transport`.

pub mod authority;
pub mod election;
pub mod error;
pub mod geometry;
pub mod mailbox;
pub mod partition;
pub mod planner;
pub mod runtime;
pub mod simulator;
pub mod store;
pub mod telemetry;
pub mod watchdog;

pub use authority::{AuthorityEntry, AuthorityTracker, OwnershipState, TelemetryRow};
pub use election::{ElectionStore, InMemoryElectionStore, OwnershipElection, OWNER_KEY};
pub use error::{AtlasError, AtlasResult};
pub use geometry::{Bound, BoundsID, GridCell, GridCellHeuristic, Heuristic, HeuristicKind};
pub use mailbox::{PendingIncomingHandoff, PendingOutgoingHandoff, TransferMailbox};
pub use partition::PartitionManifest;
pub use planner::{BorderHandoffPlanner, DEFAULT_HANDOFF_DELAY_US};
pub use runtime::{
    wire_handoff_packet_manager, HandoffRuntime, HandoffRuntimeConfig, IncomingPacketSender,
    DEFAULT_PERIMETER_REFRESH_INTERVAL,
};
pub use simulator::{DebugEntitySimulator, LinearBounceSimulator, OrbitSimulator, SeedOptions, TickOptions};
pub use store::InMemoryPartitionStore;
#[cfg(feature = "redis-backend")]
pub use store::RedisPartitionStore;
pub use store::PartitionStore;
pub use telemetry::TelemetryPublisher;
pub use watchdog::{
    ActiveTransferRecord, Discrepancy, InMemoryWatchdogStore, TransferState, TransferWatchdog, WatchdogStore,
};
