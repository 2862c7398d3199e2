//! Weather field.
//!
//! A uniform grid of cells over the world, each with a procedurally
//! generated wind vector and pressure. Generated once and immutable. Wind
//! points roughly towards the centre of the grid.

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::entity::{AuthorityStore, EntityId};
use crate::math::Vec3;
use crate::schema::{ComponentData, ComponentKind, WeatherCellState};

pub const CELL_SPACING: f32 = 500.0;

const BASE_WIND: f32 = 8.0;
const BASE_PRESSURE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct WeatherField {
    edge_length: f32,
    cells_per_axis: usize,
    /// Row-major by x then z.
    cells: Vec<WeatherCellState>,
}

impl WeatherField {
    /// Builds the grid for a world of the given edge length.
    pub fn generate(edge_length: f32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let cells_per_axis = (edge_length / CELL_SPACING).round().max(0.0) as usize;
        let center = (cells_per_axis as f32 - 1.0) * 0.5;

        let mut cells = Vec::with_capacity(cells_per_axis * cells_per_axis);
        for x in 0..cells_per_axis {
            for z in 0..cells_per_axis {
                let to_center = Vec3::new(center - x as f32, 0.0, center - z as f32).normalized();
                let wobble = (rng.gen::<f32>() - 0.5) * (PI / 4.0);
                let (sin, cos) = wobble.sin_cos();
                let dir = Vec3::new(
                    to_center.x * cos - to_center.z * sin,
                    0.0,
                    to_center.x * sin + to_center.z * cos,
                );
                let magnitude = BASE_WIND * (1.0 + (rng.gen::<f32>() - 0.5) * 0.2);
                cells.push(WeatherCellState {
                    pressure: BASE_PRESSURE,
                    wind: dir * magnitude,
                });
            }
        }

        Self {
            edge_length,
            cells_per_axis,
            cells,
        }
    }

    pub fn cells_per_axis(&self) -> usize {
        self.cells_per_axis
    }

    fn grid_start(&self) -> f32 {
        -(self.cells_per_axis as f32 * CELL_SPACING * 0.5) + CELL_SPACING
    }

    fn cell(&self, ix: i64, iz: i64) -> Option<&WeatherCellState> {
        let n = self.cells_per_axis as i64;
        if !(0..n).contains(&ix) || !(0..n).contains(&iz) {
            return None;
        }
        self.cells.get((ix * n + iz) as usize)
    }

    /// Every cell with its world-space x/z coordinate.
    pub fn cells(&self) -> impl Iterator<Item = (f32, f32, WeatherCellState)> + '_ {
        let start = self.grid_start();
        let n = self.cells_per_axis;
        self.cells.iter().enumerate().map(move |(i, cell)| {
            let (x, z) = (i / n, i % n);
            (
                start + x as f32 * CELL_SPACING,
                start + z as f32 * CELL_SPACING,
                *cell,
            )
        })
    }

    fn to_cell_coord(&self, v: f32) -> i64 {
        let half = self.edge_length * 0.5;
        let v = if v >= half {
            half - 0.0001
        } else if v < -half {
            -half
        } else {
            v
        };
        (v / CELL_SPACING).floor() as i64
    }

    /// Weather at a world position. Positions outside the grid read as the
    /// zero cell.
    pub fn weather_at(&self, pos: Vec3) -> WeatherCellState {
        let offset = self.cells_per_axis as i64 / 2 - 1;
        let ix = self.to_cell_coord(pos.x) + offset;
        let iz = self.to_cell_coord(pos.z) + offset;
        self.cell(ix, iz).copied().unwrap_or_default()
    }

    /// Weather component of an entity.
    ///
    /// Returns the stored value if there is one. Otherwise derives it from
    /// the entity's transform and caches it in the store. `None` when the
    /// entity has neither.
    pub fn weather_for(
        &self,
        store: &mut AuthorityStore,
        entity: EntityId,
    ) -> Option<WeatherCellState> {
        let kind = ComponentKind::WeatherCellState;
        if let Some(cell) = store
            .get_component(entity, kind)
            .and_then(ComponentData::as_weather_cell)
        {
            return Some(*cell);
        }
        let pos = store.transform(entity)?.position();
        let cell = self.weather_at(pos);
        store.set_component(entity, kind, ComponentData::WeatherCell(cell));
        Some(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TransformState;

    #[test]
    fn grid_size_and_coordinates() {
        let field = WeatherField::generate(2000.0, Some(1));
        assert_eq!(field.cells_per_axis(), 4);
        let coords: Vec<(f32, f32)> = field.cells().map(|(x, z, _)| (x, z)).collect();
        assert_eq!(coords.len(), 16);
        assert_eq!(coords[0], (-500.0, -500.0));
        assert_eq!(coords[15], (1000.0, 1000.0));
    }

    #[test]
    fn wind_magnitude_and_pressure_are_bounded() {
        let field = WeatherField::generate(5000.0, Some(42));
        for (_, _, cell) in field.cells() {
            assert_eq!(cell.pressure, 0.5);
            let m = cell.wind.len();
            assert!((7.19..=8.81).contains(&m), "magnitude {m}");
            assert_eq!(cell.wind.y, 0.0);
        }
    }

    #[test]
    fn same_seed_same_field() {
        let a: Vec<_> = WeatherField::generate(3000.0, Some(9)).cells().collect();
        let b: Vec<_> = WeatherField::generate(3000.0, Some(9)).cells().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn point_queries_clamp_to_the_edge() {
        let field = WeatherField::generate(2000.0, Some(3));
        let inside = field.weather_at(Vec3::new(999_999.0, 0.0, 999_999.0));
        assert_ne!(inside, WeatherCellState::default());
        let empty = WeatherField::generate(0.0, Some(3));
        assert_eq!(empty.weather_at(Vec3::ZERO), WeatherCellState::default());
    }

    #[test]
    fn weather_for_caches_derived_value() {
        let field = WeatherField::generate(2000.0, Some(5));
        let mut store = AuthorityStore::new();
        let e = store.allocate_entity_id();
        assert!(field.weather_for(&mut store, e).is_none());

        store.set_component(
            e,
            ComponentKind::TransformState,
            ComponentData::Transform(TransformState::at(Vec3::new(100.0, 0.0, 100.0), 0)),
        );
        let derived = field.weather_for(&mut store, e).unwrap();
        assert_eq!(derived, field.weather_at(Vec3::new(100.0, 0.0, 100.0)));
        assert!(store.get_component(e, ComponentKind::WeatherCellState).is_some());
    }
}
