//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p skyshard_server -- [--config config/server.json] [--bind 0.0.0.0:7777]
//!       [--world data/shard_sunset.json] [--items data/items.json] [--max-peers 32]
//!
//! Flags override values from the config file. The server runs until Ctrl-C.

use std::env;

use anyhow::Context;
use skyshard_server::GameServer;
use skyshard_shared::config::ServerConfig;
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::world::WorldMap;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    parse_flags(&args)
}

fn parse_flags(args: &[String]) -> anyhow::Result<ServerConfig> {
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone());
    let mut cfg = match config_path {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => i += 2,
            "--bind" if i + 1 < args.len() => {
                cfg.bind_addr = args[i + 1].clone();
                i += 2;
            }
            "--world" if i + 1 < args.len() => {
                cfg.world_data_path = args[i + 1].clone();
                i += 2;
            }
            "--items" if i + 1 < args.len() => {
                cfg.item_catalog_path = args[i + 1].clone();
                i += 2;
            }
            "--max-peers" if i + 1 < args.len() => {
                match args[i + 1].parse() {
                    Ok(max_peers) => cfg.max_peers = max_peers,
                    Err(e) => warn!(
                        value = %args[i + 1],
                        error = %e,
                        default = cfg.max_peers,
                        "Ignoring invalid --max-peers"
                    ),
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    let world = WorldMap::load(&cfg.world_data_path);
    let items = ItemCatalog::load(&cfg.item_catalog_path);

    let mut server = GameServer::bind(cfg, &world, items)
        .await
        .context("start server")?;
    if let Some(local) = server.local_addr() {
        info!(%local, "Server listening");
    }

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("load configuration")?;
    info!(
        bind = %cfg.bind_addr,
        world = %cfg.world_data_path,
        items = %cfg.item_catalog_path,
        max_peers = cfg.max_peers,
        "Starting server"
    );

    LocalSet::new().run_until(run(cfg)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(flags: &[&str]) -> Vec<String> {
        std::iter::once("server")
            .chain(flags.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn flags_override_defaults() -> anyhow::Result<()> {
        let cfg = parse_flags(&args(&["--bind", "127.0.0.1:9000", "--max-peers", "8"]))?;
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.max_peers, 8);
        Ok(())
    }

    #[test]
    fn unparsable_max_peers_keeps_the_default() -> anyhow::Result<()> {
        let cfg = parse_flags(&args(&["--max-peers", "lots"]))?;
        assert_eq!(cfg.max_peers, ServerConfig::default().max_peers);
        Ok(())
    }
}
