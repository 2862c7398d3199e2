//! Configuration system.
//!
//! Loads server configuration from JSON strings/files. Every field has a
//! default so a partial file (or none at all) is valid.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::net::PLACEHOLDER;

/// Asset a client is asked to load before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPreload {
    pub asset: String,
    #[serde(default = "default_placeholder")]
    pub tag: String,
}

impl AssetPreload {
    pub fn new(asset: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            tag: tag.into(),
        }
    }
}

/// Root server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP listen address, e.g. `0.0.0.0:7777`.
    pub bind_addr: String,
    /// Connections beyond this are refused at handshake.
    pub max_peers: usize,
    /// Upper bound on one transport poll.
    pub poll_timeout_ms: u64,
    /// World static data file.
    pub world_data_path: String,
    /// Item type -> character slot catalog.
    pub item_catalog_path: String,
    /// Prefab of the entity spawned before the player.
    pub home_prefab: String,
    pub player_prefab: String,
    pub player_tag: String,
    /// Requested ahead of the world's own prefabs.
    pub preload_assets: Vec<AssetPreload>,
    /// Pacing of the stream started when a player spawns.
    pub initial_spawn_interval_ms: u64,
    /// Pacing of streams restarted by movement.
    pub resync_spawn_interval_ms: u64,
    /// Minimum time between two movement-triggered restarts per entity.
    pub resync_cooldown_secs: u64,
    pub replication_radius: f32,
    /// Weather cells are visible from further away than other entities.
    pub weather_replication_radius: f32,
    /// Fixed seed for weather generation; random when absent.
    pub weather_seed: Option<u64>,
}

fn default_placeholder() -> String {
    PLACEHOLDER.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7777".to_string(),
            max_peers: 32,
            poll_timeout_ms: 25,
            world_data_path: "data/shard_sunset.json".to_string(),
            item_catalog_path: "data/items.json".to_string(),
            home_prefab: "949069116@Island".to_string(),
            player_prefab: "Traveller".to_string(),
            player_tag: "Player".to_string(),
            preload_assets: vec![
                AssetPreload::new("GlobalEntity", PLACEHOLDER),
                AssetPreload::new("Traveller", "Player"),
            ],
            initial_spawn_interval_ms: 2000,
            resync_spawn_interval_ms: 1500,
            resync_cooldown_secs: 60,
            replication_radius: 5000.0,
            weather_replication_radius: 10000.0,
            weather_seed: None,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg =
            ServerConfig::from_json_str(r#"{ "bind_addr": "127.0.0.1:9000", "weather_seed": 7 }"#)
                .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.weather_seed, Some(7));
        assert_eq!(cfg.home_prefab, "949069116@Island");
        assert_eq!(cfg.preload_assets.len(), 2);
    }

    #[test]
    fn preload_tag_defaults_to_placeholder() {
        let cfg =
            ServerConfig::from_json_str(r#"{ "preload_assets": [{ "asset": "GlobalEntity" }] }"#)
                .unwrap();
        assert_eq!(cfg.preload_assets, vec![AssetPreload::new("GlobalEntity", PLACEHOLDER)]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ServerConfig::load("does/not/exist.json").is_err());
    }
}
