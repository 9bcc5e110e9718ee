use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use atlas_transport::{
    ConnectionLeaseRegistry, GenericEntityPacket, NetworkIdentity, PacketBus, SubscriptionHandle, TransportError,
    GENERIC_ENTITY_PACKET_TYPE,
};
use log::{info, warn};

use crate::authority::AuthorityTracker;
use crate::election::OwnershipElection;
use crate::error::AtlasResult;
use crate::geometry::Heuristic;
use crate::mailbox::TransferMailbox;
use crate::partition::PartitionManifest;
use crate::planner::BorderHandoffPlanner;
use crate::simulator::{DebugEntitySimulator, SeedOptions, TickOptions};
use crate::telemetry::TelemetryPublisher;
use crate::watchdog::TransferWatchdog;

/// Clamp bound for `delta_seconds`, bounding catch-up after a pause (§4.9
/// step 2).
const MAX_DELTA_SECONDS: f32 = 0.25;

/// Default cadence for refreshing `LinearBounceSimulator`'s perimeter from
/// the published heuristic (§4.10: "at most once per perimeter_refresh_interval").
pub const DEFAULT_PERIMETER_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

fn now_unix_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64
}

/// A handoff packet handed off from the network task into the tick task.
/// `HandoffPacketManager`'s PacketBus subscription forwards received
/// `GenericEntityPacket`s here rather than touching the mailbox directly —
/// the bounded channel is the "lock-protected mailbox... drained at the top
/// of the next tick" described in §5.
pub struct IncomingPacketChannel {
    pub sender: Sender<GenericEntityPacket>,
    receiver: Receiver<GenericEntityPacket>,
}

impl IncomingPacketChannel {
    pub fn new() -> Self {
        let (sender, receiver) = std::sync::mpsc::channel();
        Self { sender, receiver }
    }

    fn drain(&self) -> Vec<GenericEntityPacket> {
        self.receiver.try_iter().collect()
    }
}

impl Default for IncomingPacketChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires a `PacketBus` subscription for `GenericEntityPacket` so that every
/// non-self-sent packet is forwarded into `channel` and the peer's activity
/// is recorded. Drop the returned handle (or call `cancel`) to unwire it.
pub fn wire_handoff_packet_manager(
    bus: &PacketBus,
    self_id: NetworkIdentity,
    leases: Arc<ConnectionLeaseRegistry>,
    channel_sender: Sender<GenericEntityPacket>,
) -> SubscriptionHandle {
    bus.subscribe(GENERIC_ENTITY_PACKET_TYPE, move |packet: &GenericEntityPacket| {
        if packet.sender == self_id {
            return;
        }
        leases.mark_activity(packet.sender);
        if channel_sender.send(packet.clone()).is_err() {
            let err = TransportError::SendFailed(format!(
                "incoming handoff channel closed, dropping packet for entity {}",
                packet.entity.entity_id
            ));
            warn!("{err}");
        }
    })
}

/// Per-shard orchestrator driving one tick loop. Owns every sub-component and
/// is the only thing that mutates them outside of the packet-receive path
/// (§5's single-threaded-cooperative-per-shard model). Runs as a single
/// `tokio` task per shard in the binary crate.
pub struct HandoffRuntime {
    self_id: NetworkIdentity,
    tick_counter: u64,
    last_wall_monotonic: Option<Instant>,
    last_snapshot_time: Option<Instant>,
    last_perimeter_refresh: Option<Instant>,
    has_seeded_initial_entities: bool,
    shutdown: AtomicBool,
    packet_subscription: Option<SubscriptionHandle>,

    tracker: AuthorityTracker,
    simulator: Box<dyn DebugEntitySimulator>,
    mailbox: TransferMailbox,
    planner: BorderHandoffPlanner,
    election: OwnershipElection,
    watchdog: Arc<TransferWatchdog>,
    telemetry: TelemetryPublisher,
    connection_leases: Arc<ConnectionLeaseRegistry>,
    manifest: Arc<PartitionManifest>,
    heuristic: Arc<dyn Heuristic>,
    incoming: IncomingPacketChannel,
    transport_send: Box<dyn Fn(NetworkIdentity, &GenericEntityPacket) + Send>,

    seed_options: SeedOptions,
    state_snapshot_interval: Duration,
    perimeter_refresh_interval: Duration,
}

pub struct HandoffRuntimeConfig {
    pub self_id: NetworkIdentity,
    pub simulator: Box<dyn DebugEntitySimulator>,
    pub election: OwnershipElection,
    pub watchdog: Arc<TransferWatchdog>,
    pub connection_leases: Arc<ConnectionLeaseRegistry>,
    pub manifest: Arc<PartitionManifest>,
    pub heuristic: Arc<dyn Heuristic>,
    pub handoff_delay_us: u64,
    pub seed_options: SeedOptions,
    pub state_snapshot_interval: Duration,
    pub perimeter_refresh_interval: Duration,
    pub transport_send: Box<dyn Fn(NetworkIdentity, &GenericEntityPacket) + Send>,
}

impl HandoffRuntime {
    pub fn new(config: HandoffRuntimeConfig) -> (Self, IncomingPacketSender) {
        let incoming = IncomingPacketChannel::new();
        let sender = IncomingPacketSender(incoming.sender.clone());
        let planner = BorderHandoffPlanner::new(config.self_id, config.handoff_delay_us);
        let telemetry = TelemetryPublisher::new(config.self_id);
        let runtime = Self {
            self_id: config.self_id,
            tick_counter: 0,
            last_wall_monotonic: None,
            last_snapshot_time: None,
            last_perimeter_refresh: None,
            has_seeded_initial_entities: false,
            shutdown: AtomicBool::new(false),
            packet_subscription: None,
            tracker: AuthorityTracker::new(),
            simulator: config.simulator,
            mailbox: TransferMailbox::new(),
            planner,
            election: config.election,
            watchdog: config.watchdog,
            telemetry,
            connection_leases: config.connection_leases,
            manifest: config.manifest,
            heuristic: config.heuristic,
            incoming,
            transport_send: config.transport_send,
            seed_options: config.seed_options,
            state_snapshot_interval: config.state_snapshot_interval,
            perimeter_refresh_interval: config.perimeter_refresh_interval,
        };
        (runtime, sender)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Adopts ownership of the `PacketBus` subscription wired by
    /// `wire_handoff_packet_manager`, so `shutdown` can unwire it.
    pub fn adopt_packet_subscription(&mut self, subscription: SubscriptionHandle) {
        self.packet_subscription = Some(subscription);
    }

    /// Unwires packet callbacks (by dropping the owned subscription handle,
    /// deactivating it) and marks shutdown. A second call is a no-op.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.packet_subscription = None;
        info!("{} shutting down handoff runtime", self.self_id);
    }

    /// Runs one tick in the order specified by §4.9. Returns `false` and does
    /// nothing once `shutdown` has been called.
    pub fn tick(&mut self) -> AtlasResult<bool> {
        if self.is_shutdown() {
            return Ok(false);
        }
        self.tick_counter += 1;

        let now_steady = Instant::now();
        self.connection_leases.tick(now_steady, |peer, elapsed| {
            info!("{} reaping idle link to {peer} after {elapsed:?}", self.self_id);
        });

        let now_us = now_unix_micros();
        let delta_seconds = match self.last_wall_monotonic {
            Some(last) => now_steady.saturating_duration_since(last).as_secs_f32().clamp(0.0, MAX_DELTA_SECONDS),
            None => 0.0,
        };
        self.last_wall_monotonic = Some(now_steady);

        let claimed_bounds = self.manifest.get_all_claimed_bounds()?;
        let mut known_shards: Vec<NetworkIdentity> = claimed_bounds.iter().map(|(owner, _)| *owner).collect();
        known_shards.sort();
        known_shards.dedup();
        let is_owner = self.election.evaluate(now_steady, &known_shards)?;

        self.refresh_perimeter_if_due(now_steady);

        for packet in self.incoming.drain() {
            self.mailbox.queue_incoming(packet.entity, packet.sender, packet.transfer_time_us);
        }
        let adopted = self.mailbox.adopt_incoming_if_due(now_us, self.simulator.as_mut(), &self.watchdog, self.self_id)?;

        if is_owner && !self.has_seeded_initial_entities {
            self.simulator.seed_entities(&self.seed_options);
            self.has_seeded_initial_entities = true;
        }

        if self.simulator.count() > 0 {
            self.simulator.tick(TickOptions { delta_seconds });
        }

        self.tracker.set_owned_entities(self.simulator.entities_snapshot());

        let sent_at_ms = (now_us / 1_000) as u64;
        let send = &self.transport_send;
        let outgoing = self.planner.plan_and_send_all(
            &mut self.tracker,
            &claimed_bounds,
            now_us,
            sent_at_ms,
            &self.watchdog,
            |target, packet| (send)(target, packet),
        );
        for handoff in &outgoing {
            self.mailbox.add_pending_outgoing(*handoff);
        }

        let telemetry = &self.telemetry;
        let committed = self.mailbox.commit_outgoing_if_due(
            now_us,
            self.simulator.as_mut(),
            &mut self.tracker,
            &self.watchdog,
            self.self_id,
            |tracker| {
                telemetry.publish(tracker);
            },
        )?;

        if adopted > 0 || committed > 0 || !outgoing.is_empty() {
            self.election.invalidate();
        }

        if !is_owner && self.tracker.count() == 0 && !self.mailbox.has_pending_incoming() && !self.mailbox.has_pending_outgoing() {
            self.has_seeded_initial_entities = false;
        }

        let due_for_snapshot = match self.last_snapshot_time {
            Some(last) => now_steady.saturating_duration_since(last) >= self.state_snapshot_interval,
            None => true,
        };
        if due_for_snapshot {
            self.telemetry.publish(&self.tracker);
            self.last_snapshot_time = Some(now_steady);
        }

        Ok(true)
    }

    /// Recomputes the combined bounding box of every bound the active
    /// heuristic enumerates and pushes it into the simulator, at most once
    /// per `perimeter_refresh_interval` (§4.10). A no-op for simulator
    /// variants without a perimeter concept.
    fn refresh_perimeter_if_due(&mut self, now_steady: Instant) {
        let due = match self.last_perimeter_refresh {
            Some(last) => now_steady.saturating_duration_since(last) >= self.perimeter_refresh_interval,
            None => true,
        };
        if !due {
            return;
        }
        self.last_perimeter_refresh = Some(now_steady);

        let bounds = self.heuristic.enumerate_bounds();
        let mut bounds_iter = bounds.iter();
        let first = match bounds_iter.next() {
            Some(b) => b,
            None => return,
        };
        let mut min = first.min;
        let mut max = first.max;
        for bound in bounds_iter {
            min.x = min.x.min(bound.min.x);
            min.y = min.y.min(bound.min.y);
            min.z = min.z.min(bound.min.z);
            max.x = max.x.max(bound.max.x);
            max.y = max.y.max(bound.max.y);
            max.z = max.z.max(bound.max.z);
        }
        self.simulator.set_perimeter(min, max);
    }

    pub fn tracker(&self) -> &AuthorityTracker {
        &self.tracker
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }
}

/// Cloneable front for feeding incoming handoff packets into a runtime from
/// another thread or task.
#[derive(Clone)]
pub struct IncomingPacketSender(pub Sender<GenericEntityPacket>);
