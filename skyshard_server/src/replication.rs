//! Replication registry.
//!
//! The full static entity catalog, built once at startup from the world data
//! and the weather field:
//! - one entity per island,
//! - walls cut into segments of at most [`WALL_SEGMENT_MAX`] units,
//! - one entity per weather cell.
//!
//! Entity ids come from the authority store, in that order.

use std::collections::{HashMap, HashSet};

use skyshard_shared::config::ServerConfig;
use skyshard_shared::entity::{AuthorityStore, EntityId};
use skyshard_shared::math::Vec3;
use skyshard_shared::schema::{
    ComponentData, ComponentKind, TransformState, WallSegmentState, WeatherCellState,
};
use skyshard_shared::weather::WeatherField;
use skyshard_shared::world::{Wall, WorldMap};
use tracing::debug;

pub const WALL_SEGMENT_MAX: f32 = 800.0;
pub const WALL_SEGMENT_PREFAB: &str = "WallSegment";
pub const WEATHER_CELL_PREFAB: &str = "WeatherCell";

const ISLAND_SUFFIX: &str = "@Island";
const MIN_WALL_LENGTH: f32 = 0.001;

/// Immutable record of one static entity.
#[derive(Debug, Clone)]
pub struct ReplicatedEntity {
    pub entity_id: EntityId,
    pub position: Vec3,
    pub prefab: String,
    /// Planar distance within which the entity is streamed to a player.
    pub radius: f32,
    /// Written to the authority store when the entity is spawned.
    pub initial_components: Vec<(ComponentKind, ComponentData)>,
}

impl ReplicatedEntity {
    pub fn is_island(&self) -> bool {
        self.prefab.ends_with(ISLAND_SUFFIX)
    }

    fn in_range(&self, pos: Vec3) -> bool {
        self.position.planar_distance_sq(pos) <= self.radius * self.radius
    }
}

#[derive(Debug, Default)]
pub struct ReplicationRegistry {
    entities: Vec<ReplicatedEntity>,
    index: HashMap<EntityId, usize>,
}

impl ReplicationRegistry {
    pub fn build(
        world: &WorldMap,
        weather: &WeatherField,
        store: &mut AuthorityStore,
        cfg: &ServerConfig,
    ) -> Self {
        let mut registry = Self::default();

        for island in &world.islands {
            let pos = island.position();
            registry.push(ReplicatedEntity {
                entity_id: store.allocate_entity_id(),
                position: pos,
                prefab: island.prefab(),
                radius: cfg.replication_radius,
                initial_components: vec![transform_at(pos, 1000)],
            });
        }

        let mut wall_id = 0;
        for wall in &world.walls {
            let segments = segment_wall(wall);
            if segments.is_empty() {
                continue;
            }
            wall_id += 1;
            for (pos, direction, half_length) in segments {
                registry.push(ReplicatedEntity {
                    entity_id: store.allocate_entity_id(),
                    position: pos,
                    prefab: WALL_SEGMENT_PREFAB.to_string(),
                    radius: cfg.replication_radius,
                    initial_components: vec![
                        (
                            ComponentKind::WallSegmentState,
                            ComponentData::WallSegment(WallSegmentState {
                                wall_type: wall.wall_type,
                                wall_id,
                                direction,
                                half_length,
                            }),
                        ),
                        transform_at(pos, 1000),
                    ],
                });
            }
        }

        for (x, z, cell) in weather.cells() {
            let pos = Vec3::new(x, 0.0, z);
            registry.push(ReplicatedEntity {
                entity_id: store.allocate_entity_id(),
                position: pos,
                prefab: WEATHER_CELL_PREFAB.to_string(),
                radius: cfg.weather_replication_radius,
                initial_components: vec![transform_at(pos, 0), weather_cell(cell)],
            });
        }

        debug!(
            entities = registry.entities.len(),
            walls = wall_id,
            "Registry populated"
        );
        registry
    }

    fn push(&mut self, entity: ReplicatedEntity) {
        self.index.insert(entity.entity_id, self.entities.len());
        self.entities.push(entity);
    }

    pub fn entities(&self) -> &[ReplicatedEntity] {
        &self.entities
    }

    pub fn get(&self, id: EntityId) -> Option<&ReplicatedEntity> {
        self.index.get(&id).map(|&i| &self.entities[i])
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Distinct prefabs in first-seen order.
    pub fn prefabs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entities
            .iter()
            .filter(|e| seen.insert(e.prefab.as_str()))
            .map(|e| e.prefab.clone())
            .collect()
    }

    /// Entities in range of `pos` that are not in `spawned`, nearest first.
    /// Equal distances keep registry order.
    pub fn nearby_unspawned<'a>(
        &'a self,
        pos: Vec3,
        spawned: Option<&HashSet<EntityId>>,
    ) -> Vec<&'a ReplicatedEntity> {
        let mut candidates: Vec<(f32, &ReplicatedEntity)> = self
            .entities
            .iter()
            .filter(|e| spawned.map_or(true, |s| !s.contains(&e.entity_id)))
            .filter(|e| e.in_range(pos))
            .map(|e| (e.position.planar_distance_sq(pos), e))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        candidates.into_iter().map(|(_, e)| e).collect()
    }

    /// Nearest island to `pos` among the `spawned` entities.
    pub fn nearest_island(
        &self,
        pos: Vec3,
        spawned: &HashSet<EntityId>,
    ) -> Option<&ReplicatedEntity> {
        self.entities
            .iter()
            .filter(|e| e.is_island() && spawned.contains(&e.entity_id))
            .min_by(|a, b| {
                a.position
                    .planar_distance_sq(pos)
                    .total_cmp(&b.position.planar_distance_sq(pos))
            })
    }
}

fn transform_at(pos: Vec3, update_interval_ms: u32) -> (ComponentKind, ComponentData) {
    (
        ComponentKind::TransformState,
        ComponentData::Transform(TransformState::at(pos, update_interval_ms)),
    )
}

fn weather_cell(cell: WeatherCellState) -> (ComponentKind, ComponentData) {
    (
        ComponentKind::WeatherCellState,
        ComponentData::WeatherCell(cell),
    )
}

/// Cuts a wall into `(midpoint, direction, half_length)` segments. The last
/// segment takes the remainder. Degenerate walls yield nothing.
pub fn segment_wall(wall: &Wall) -> Vec<(Vec3, Vec3, f32)> {
    let start = wall.start();
    let delta = wall.end() - start;
    let length = delta.len();
    if length <= MIN_WALL_LENGTH {
        return Vec::new();
    }
    let direction = delta.normalized();

    let full = (length / WALL_SEGMENT_MAX) as usize;
    let remainder = length - full as f32 * WALL_SEGMENT_MAX;
    let total = if remainder > 0.0 { full + 1 } else { full };

    let mut covered = 0.0;
    (0..total)
        .map(|i| {
            let seg = if i == total - 1 && remainder > 0.0 {
                remainder
            } else {
                WALL_SEGMENT_MAX
            };
            let half = seg * 0.5;
            let mid = start + direction * (covered + half);
            covered += seg;
            (Vec3::new(mid.x, 0.0, mid.z), direction, half)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyshard_shared::world::{Island, WorldInfo};

    fn island(x: f32, z: f32, name: &str) -> Island {
        Island {
            x,
            y: 0.0,
            z,
            island: format!("{name}.json"),
        }
    }

    fn wall(x2: f32) -> Wall {
        Wall {
            x1: 0.0,
            z1: 0.0,
            x2,
            z2: 0.0,
            wall_type: 2,
        }
    }

    fn build(world: &WorldMap) -> (ReplicationRegistry, AuthorityStore) {
        let weather = WeatherField::generate(world.edge_length(), Some(1));
        let mut store = AuthorityStore::new();
        let registry =
            ReplicationRegistry::build(world, &weather, &mut store, &ServerConfig::default());
        (registry, store)
    }

    #[test]
    fn wall_is_cut_with_remainder_last() {
        let segments = segment_wall(&wall(2000.0));
        let halves: Vec<f32> = segments.iter().map(|s| s.2).collect();
        assert_eq!(halves, vec![400.0, 400.0, 200.0]);
        assert_eq!(segments[0].0, Vec3::new(400.0, 0.0, 0.0));
        assert_eq!(segments[2].0, Vec3::new(1800.0, 0.0, 0.0));
        assert_eq!(segments[1].1, Vec3::new(1.0, 0.0, 0.0));

        assert_eq!(segment_wall(&wall(1600.0)).len(), 2);
        assert!(segment_wall(&wall(0.0)).is_empty());
    }

    #[test]
    fn ids_follow_islands_walls_weather() {
        let world = WorldMap {
            world_info: WorldInfo {
                world_edge_length: 1000.0,
                ..Default::default()
            },
            islands: vec![island(0.0, 0.0, "1"), island(10.0, 0.0, "2")],
            walls: vec![wall(0.0), wall(900.0)],
            ..Default::default()
        };
        let (registry, mut store) = build(&world);
        let prefabs: Vec<&str> = registry.entities().iter().map(|e| e.prefab.as_str()).collect();
        assert_eq!(
            prefabs,
            vec![
                "1@Island",
                "2@Island",
                "WallSegment",
                "WallSegment",
                "WeatherCell",
                "WeatherCell",
                "WeatherCell",
                "WeatherCell",
            ]
        );
        let ids: Vec<u64> = registry.entities().iter().map(|e| e.entity_id.0).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(store.allocate_entity_id(), EntityId(9));

        let segment = &registry.entities()[2];
        match &segment.initial_components[0].1 {
            ComponentData::WallSegment(s) => assert_eq!(s.wall_id, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.entities()[4].radius, 10000.0);
        assert_eq!(registry.prefabs(), vec!["1@Island", "2@Island", "WallSegment", "WeatherCell"]);
    }

    #[test]
    fn nearby_is_sorted_and_bounded() {
        let world = WorldMap {
            islands: vec![
                island(3000.0, 0.0, "far"),
                island(100.0, 0.0, "near"),
                island(0.0, 6000.0, "out"),
                island(0.0, 1000.0, "mid"),
            ],
            ..Default::default()
        };
        let (registry, _) = build(&world);
        let order: Vec<&str> = registry
            .nearby_unspawned(Vec3::ZERO, None)
            .iter()
            .map(|e| e.prefab.as_str())
            .collect();
        assert_eq!(order, vec!["near@Island", "mid@Island", "far@Island"]);

        let spawned: HashSet<EntityId> = [registry.entities()[1].entity_id].into_iter().collect();
        assert_eq!(registry.nearby_unspawned(Vec3::ZERO, Some(&spawned)).len(), 2);
    }

    #[test]
    fn nearest_island_only_considers_spawned() {
        let world = WorldMap {
            islands: vec![island(100.0, 0.0, "a"), island(900.0, 0.0, "b")],
            ..Default::default()
        };
        let (registry, _) = build(&world);
        let b = registry.entities()[1].entity_id;
        let spawned: HashSet<EntityId> = [b].into_iter().collect();
        assert_eq!(registry.nearest_island(Vec3::ZERO, &spawned).map(|e| e.entity_id), Some(b));
        assert!(registry.nearest_island(Vec3::ZERO, &HashSet::new()).is_none());
    }
}
