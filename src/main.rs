mod config;

use std::sync::Arc;
use std::time::Duration;

use atlas_manifest::{
    wire_handoff_packet_manager, GridCellHeuristic, HandoffRuntime, HandoffRuntimeConfig, Heuristic,
    HeuristicKind, InMemoryElectionStore, InMemoryWatchdogStore, LinearBounceSimulator, OwnershipElection,
    PartitionManifest, PartitionStore, SeedOptions, TransferWatchdog,
};
use atlas_transport::{ConnectionLeaseRegistry, NetworkIdentity, PacketBus, Vec3};

use config::ShardConfig;

const WORLD_MIN: (f32, f32) = (-1_000.0, -1_000.0);
const WORLD_MAX: (f32, f32) = (1_000.0, 1_000.0);
const CELL_SIZE: f32 = 200.0;
const SEED_ENTITY_COUNT: u32 = 5;

fn build_store(config: &ShardConfig) -> Arc<dyn PartitionStore> {
    #[cfg(feature = "redis-backend")]
    if let Some(url) = &config.store_url {
        match atlas_manifest::RedisPartitionStore::connect(url) {
            Ok(store) => return Arc::new(store),
            Err(err) => log::warn!("failed to connect to {url}: {err}, falling back to an in-memory store"),
        }
    }
    let _ = config;
    Arc::new(atlas_manifest::InMemoryPartitionStore::new())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ShardConfig::from_env() {
        Ok(c) => c,
        Err(err) => {
            log::error!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    let self_id = NetworkIdentity::make_shard(config.shard_id);
    log::info!("starting {self_id} at {} Hz, handoff delay {}us", config.tick_hz, config.handoff_delay_us);

    let store = build_store(&config);
    let manifest = Arc::new(PartitionManifest::new(store));
    let heuristic: Arc<dyn Heuristic> = Arc::new(GridCellHeuristic::new(WORLD_MIN, WORLD_MAX, CELL_SIZE));
    if manifest.active_heuristic_kind().unwrap_or(HeuristicKind::None) == HeuristicKind::None {
        if let Err(err) = manifest.push_heuristic(heuristic.as_ref()) {
            log::warn!("could not publish initial heuristic (likely already published by a peer): {err}");
        }
    }
    if let Err(err) = manifest.claim_next_pending(&self_id) {
        log::error!("failed to claim a partition bound: {err}");
    }

    let election_store = Arc::new(InMemoryElectionStore::new());
    let election = OwnershipElection::new(election_store, self_id, config.holder_ttl, Duration::from_millis(500));
    let watchdog = Arc::new(TransferWatchdog::new(Arc::new(InMemoryWatchdogStore::new()), config.holder_ttl));
    let connection_leases = Arc::new(ConnectionLeaseRegistry::new(config.holder_ttl));
    let packet_bus = PacketBus::new();

    let simulator = Box::new(LinearBounceSimulator::new(
        Vec3::new(WORLD_MIN.0, WORLD_MIN.1, 0.0),
        Vec3::new(WORLD_MAX.0, WORLD_MAX.1, 0.0),
    ));
    let seed_options =
        SeedOptions { count: SEED_ENTITY_COUNT, world: 0, center: Vec3::new(0.0, 0.0, 0.0), spread: 10.0 };

    let transport_send = Box::new(move |target: NetworkIdentity, packet: &atlas_transport::GenericEntityPacket| {
        log::info!(
            "handoff packet for entity {} addressed to {target} (byte transport is wired by the deployment, not this binary)",
            packet.entity.entity_id
        );
    });

    let (mut runtime, incoming_sender) = HandoffRuntime::new(HandoffRuntimeConfig {
        self_id,
        simulator,
        election,
        watchdog,
        connection_leases: connection_leases.clone(),
        manifest,
        heuristic,
        handoff_delay_us: config.handoff_delay_us,
        seed_options,
        state_snapshot_interval: config.telemetry_interval,
        perimeter_refresh_interval: atlas_manifest::DEFAULT_PERIMETER_REFRESH_INTERVAL,
        transport_send,
    });
    let packet_subscription =
        wire_handoff_packet_manager(&packet_bus, self_id, connection_leases, incoming_sender.0);
    runtime.adopt_packet_subscription(packet_subscription);

    let mut ticker = tokio::time::interval(config.tick_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match runtime.tick() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => log::error!("tick {} failed: {err}", runtime.tick_count()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("received shutdown signal");
                runtime.shutdown();
            }
        }
        if runtime.is_shutdown() {
            break;
        }
    }
}
