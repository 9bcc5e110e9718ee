use atlas_transport::{Aabb, AtlasEntity, Vec3};

/// Options for seeding a fresh batch of entities when a shard becomes owner
/// of a previously-unowned bound.
#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub count: u32,
    pub world: u16,
    pub center: Vec3,
    pub spread: f32,
}

/// Options for advancing the simulation by one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickOptions {
    pub delta_seconds: f32,
}

/// Interface contract every debug entity simulator variant satisfies (§4.10).
/// The runtime is agnostic to which concrete variant is wired in.
pub trait DebugEntitySimulator: Send {
    fn reset(&mut self);
    fn seed_entities(&mut self, opts: &SeedOptions);
    fn adopt_single_entity(&mut self, entity: AtlasEntity);
    fn remove_entity(&mut self, entity_id: u64);
    fn tick(&mut self, opts: TickOptions);
    fn entities_snapshot(&self) -> Vec<AtlasEntity>;
    fn count(&self) -> usize;

    /// Updates the perimeter used for reflection, if this variant has one.
    /// Variants without a perimeter concept (e.g. the orbit simulator) accept
    /// and ignore it.
    fn set_perimeter(&mut self, _min: Vec3, _max: Vec3) {}
}

const HALF_EXTENT: Vec3 = Vec3 { x: 0.5, y: 0.5, z: 0.5 };

fn next_entity_id(existing: &std::collections::HashMap<u64, AtlasEntity>) -> u64 {
    existing.keys().max().map(|m| m + 1).unwrap_or(1)
}

/// Moves each entity in a circle around a fixed center at a fixed angular
/// rate. Entity ids and angular phase survive adopt/tick cycles.
pub struct OrbitSimulator {
    entities: std::collections::HashMap<u64, AtlasEntity>,
    phase: std::collections::HashMap<u64, f32>,
    center: Vec3,
    radius: f32,
    angular_rate: f32,
}

impl OrbitSimulator {
    pub fn new(center: Vec3, radius: f32, angular_rate: f32) -> Self {
        Self { entities: Default::default(), phase: Default::default(), center, radius, angular_rate }
    }

    fn position_at(&self, phase: f32) -> Vec3 {
        Vec3::new(self.center.x + self.radius * phase.cos(), self.center.y + self.radius * phase.sin(), self.center.z)
    }
}

impl DebugEntitySimulator for OrbitSimulator {
    fn reset(&mut self) {
        self.entities.clear();
        self.phase.clear();
    }

    fn seed_entities(&mut self, opts: &SeedOptions) {
        for i in 0..opts.count {
            let id = next_entity_id(&self.entities);
            let phase = (i as f32) * std::f32::consts::TAU / (opts.count.max(1) as f32);
            let position = self.position_at(phase);
            self.entities.insert(
                id,
                AtlasEntity {
                    entity_id: id,
                    client_id: uuid::Uuid::new_v4(),
                    is_client: false,
                    world: opts.world,
                    position,
                    bounding_box: Aabb::centered(position, HALF_EXTENT),
                    metadata: Vec::new(),
                },
            );
            self.phase.insert(id, phase);
        }
    }

    fn adopt_single_entity(&mut self, entity: AtlasEntity) {
        let dx = entity.position.x - self.center.x;
        let dy = entity.position.y - self.center.y;
        let phase = dy.atan2(dx);
        self.phase.insert(entity.entity_id, phase);
        self.entities.insert(entity.entity_id, entity);
    }

    fn remove_entity(&mut self, entity_id: u64) {
        self.entities.remove(&entity_id);
        self.phase.remove(&entity_id);
    }

    fn tick(&mut self, opts: TickOptions) {
        for (id, entity) in self.entities.iter_mut() {
            let phase = self.phase.entry(*id).or_insert(0.0);
            *phase += self.angular_rate * opts.delta_seconds;
            let position = Vec3::new(
                self.center.x + self.radius * phase.cos(),
                self.center.y + self.radius * phase.sin(),
                self.center.z,
            );
            entity.position = position;
            entity.bounding_box = Aabb::centered(position, HALF_EXTENT);
        }
    }

    fn entities_snapshot(&self) -> Vec<AtlasEntity> {
        self.entities.values().cloned().collect()
    }

    fn count(&self) -> usize {
        self.entities.len()
    }
}

/// Moves each entity linearly, reflecting velocity off the combined world
/// perimeter. The perimeter is supplied by the caller (recomputed from
/// PartitionManifest + configured world bounds, per §4.10) and refreshed at
/// most once per `perimeter_refresh_interval` by the owning runtime — this
/// type itself just reflects against whatever perimeter it was given.
pub struct LinearBounceSimulator {
    entities: std::collections::HashMap<u64, AtlasEntity>,
    velocity: std::collections::HashMap<u64, Vec3>,
    perimeter_min: Vec3,
    perimeter_max: Vec3,
}

impl LinearBounceSimulator {
    pub fn new(perimeter_min: Vec3, perimeter_max: Vec3) -> Self {
        Self { entities: Default::default(), velocity: Default::default(), perimeter_min, perimeter_max }
    }

    pub fn seed_with_velocity(&mut self, id: u64, world: u16, position: Vec3, velocity: Vec3) {
        self.entities.insert(
            id,
            AtlasEntity {
                entity_id: id,
                client_id: uuid::Uuid::new_v4(),
                is_client: false,
                world,
                position,
                bounding_box: Aabb::centered(position, HALF_EXTENT),
                metadata: Vec::new(),
            },
        );
        self.velocity.insert(id, velocity);
    }
}

impl DebugEntitySimulator for LinearBounceSimulator {
    fn reset(&mut self) {
        self.entities.clear();
        self.velocity.clear();
    }

    fn seed_entities(&mut self, opts: &SeedOptions) {
        for i in 0..opts.count {
            let id = next_entity_id(&self.entities);
            let offset = Vec3::new((i as f32) * opts.spread, 0.0, 0.0);
            let position = Vec3::new(opts.center.x + offset.x, opts.center.y + offset.y, opts.center.z);
            self.seed_with_velocity(id, opts.world, position, Vec3::new(1.0, 0.0, 0.0));
        }
    }

    fn adopt_single_entity(&mut self, entity: AtlasEntity) {
        self.velocity.entry(entity.entity_id).or_insert(Vec3::new(1.0, 0.0, 0.0));
        self.entities.insert(entity.entity_id, entity);
    }

    fn remove_entity(&mut self, entity_id: u64) {
        self.entities.remove(&entity_id);
        self.velocity.remove(&entity_id);
    }

    fn tick(&mut self, opts: TickOptions) {
        for (id, entity) in self.entities.iter_mut() {
            let velocity = self.velocity.entry(*id).or_insert(Vec3::new(1.0, 0.0, 0.0));
            let mut position = Vec3::new(
                entity.position.x + velocity.x * opts.delta_seconds,
                entity.position.y + velocity.y * opts.delta_seconds,
                entity.position.z + velocity.z * opts.delta_seconds,
            );
            if position.x > self.perimeter_max.x {
                position.x = self.perimeter_max.x;
                velocity.x = -velocity.x;
            } else if position.x < self.perimeter_min.x {
                position.x = self.perimeter_min.x;
                velocity.x = -velocity.x;
            }
            if position.y > self.perimeter_max.y {
                position.y = self.perimeter_max.y;
                velocity.y = -velocity.y;
            } else if position.y < self.perimeter_min.y {
                position.y = self.perimeter_min.y;
                velocity.y = -velocity.y;
            }
            entity.position = position;
            entity.bounding_box = Aabb::centered(position, HALF_EXTENT);
        }
    }

    fn entities_snapshot(&self) -> Vec<AtlasEntity> {
        self.entities.values().cloned().collect()
    }

    fn count(&self) -> usize {
        self.entities.len()
    }

    fn set_perimeter(&mut self, min: Vec3, max: Vec3) {
        self.perimeter_min = min;
        self.perimeter_max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_simulator_preserves_entity_id_across_adopt_tick_cycles() {
        let mut sim = OrbitSimulator::new(Vec3::ZERO, 5.0, 1.0);
        sim.seed_entities(&SeedOptions { count: 1, world: 0, center: Vec3::ZERO, spread: 0.0 });
        let entity = sim.entities_snapshot().remove(0);
        let id = entity.entity_id;
        sim.remove_entity(id);
        sim.adopt_single_entity(entity);
        sim.tick(TickOptions { delta_seconds: 0.1 });
        assert_eq!(sim.entities_snapshot()[0].entity_id, id);
    }

    #[test]
    fn linear_bounce_reflects_velocity_at_perimeter() {
        let mut sim = LinearBounceSimulator::new(Vec3::new(-5.0, -5.0, 0.0), Vec3::new(5.0, 5.0, 0.0));
        sim.seed_with_velocity(1, 0, Vec3::new(4.9, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        sim.tick(TickOptions { delta_seconds: 0.2 });
        let entity = &sim.entities_snapshot()[0];
        assert!(entity.position.x <= 5.0);
        assert_eq!(*sim.velocity.get(&1).unwrap(), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn linear_bounce_stays_within_perimeter_over_many_ticks() {
        let mut sim = LinearBounceSimulator::new(Vec3::new(-5.0, -5.0, 0.0), Vec3::new(5.0, 5.0, 0.0));
        sim.seed_with_velocity(1, 0, Vec3::new(4.9, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        for _ in 0..100 {
            sim.tick(TickOptions { delta_seconds: 0.2 });
            let entity = &sim.entities_snapshot()[0];
            assert!(entity.position.x >= -5.0 && entity.position.x <= 5.0);
        }
    }
}
