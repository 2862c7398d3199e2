//! World static data.
//!
//! Fixed description of the shard: islands, walls, biomes, and the world
//! edge length. Loaded once at startup and read-only afterwards. A missing
//! or malformed file degrades to an empty world.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::math::Vec3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldInfo {
    #[serde(rename = "GSIMConfig", alias = "gsimConfig")]
    pub gsim_config: String,
    #[serde(rename = "WorldEdgeLength", alias = "worldEdgeLength")]
    pub world_edge_length: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Haven {
    #[serde(rename = "xOfVerticalSeparator")]
    pub x_of_vertical_separator: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Island {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Island asset file name, e.g. `949069116.json`.
    #[serde(rename = "Island", alias = "island")]
    pub island: String,
}

impl Island {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Prefab name the client resolves for this island.
    pub fn prefab(&self) -> String {
        format!("{}@Island", self.island.replace(".json", ""))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Biome {
    pub x: f32,
    pub z: f32,
    #[serde(rename = "Type", alias = "type")]
    pub biome_type: i32,
    #[serde(rename = "Civ", alias = "civ")]
    pub civ: i32,
    #[serde(rename = "District", alias = "district")]
    pub district: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Wall {
    pub x1: f32,
    pub z1: f32,
    pub x2: f32,
    pub z2: f32,
    #[serde(rename = "Type", alias = "type")]
    pub wall_type: i32,
}

impl Wall {
    pub fn start(&self) -> Vec3 {
        Vec3::new(self.x1, 0.0, self.z1)
    }

    pub fn end(&self) -> Vec3 {
        Vec3::new(self.x2, 0.0, self.z2)
    }
}

/// Whole-world description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldMap {
    #[serde(rename = "WorldInfo", alias = "worldInfo")]
    pub world_info: WorldInfo,
    #[serde(rename = "Haven", alias = "haven")]
    pub haven: Option<Haven>,
    #[serde(rename = "Islands", alias = "islands")]
    pub islands: Vec<Island>,
    #[serde(rename = "Biomes", alias = "biomes")]
    pub biomes: Vec<Biome>,
    #[serde(rename = "Walls", alias = "walls")]
    pub walls: Vec<Wall>,
}

impl WorldMap {
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    fn try_load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read world data {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse world data {}", path.display()))
    }

    /// Loads the world file, logging and returning an empty world on failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(world) => {
                info!(
                    path = %path.display(),
                    islands = world.islands.len(),
                    walls = world.walls.len(),
                    biomes = world.biomes.len(),
                    edge = world.world_info.world_edge_length,
                    "World data loaded"
                );
                world
            }
            Err(e) => {
                error!(error = ?e, "Failed to load world data, using an empty world");
                Self::default()
            }
        }
    }

    pub fn edge_length(&self) -> f32 {
        self.world_info.world_edge_length
    }
}
