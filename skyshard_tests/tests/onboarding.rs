//! Sync script progression over a loopback transport.

use std::time::Duration;

use skyshard_server::sync::SyncAction;
use skyshard_shared::config::ServerConfig;
use skyshard_shared::entity::EntityId;
use skyshard_shared::items::ItemCatalog;
use skyshard_shared::net::{AssetLoadRequestOp, Channel, PeerId, PLACEHOLDER};
use skyshard_tests::{init_tracing, one_island_world, test_config, Harness, ISLAND_PREFAB};
use tokio::task::LocalSet;

const P1: PeerId = PeerId(1);
const P2: PeerId = PeerId(2);

#[tokio::test(start_paused = true)]
async fn peer_walks_assets_then_home_then_player() -> anyhow::Result<()> {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let mut h = Harness::new(test_config(), &one_island_world(), ItemCatalog::default());
            assert_eq!(h.server.script().len(), 3);

            h.connect(P1).await?;
            let requests: Vec<AssetLoadRequestOp> = h.sent_ops(P1, Channel::AssetLoadRequest)?;
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].asset, ISLAND_PREFAB);
            assert_eq!(requests[0].asset_type, PLACEHOLDER);
            assert_eq!(requests[0].context, PLACEHOLDER);

            // An entity ack does not satisfy an asset step.
            h.ack_entity(P1).await?;
            assert_eq!(h.server.session(P1).map(|s| s.sync.cursor()), Some(0));
            assert!(h.added_entities(P1)?.is_empty());

            h.ack_asset(P1).await?;
            let added = h.added_entities(P1)?;
            assert_eq!(added.len(), 1);
            assert_eq!(added[0].entity_id, EntityId(2));
            assert_eq!(added[0].prefab, ISLAND_PREFAB);
            assert_eq!(added[0].tag, PLACEHOLDER);

            h.ack_entity(P1).await?;
            let added = h.added_entities(P1)?;
            assert_eq!(added.len(), 2);
            assert_eq!(added[1].entity_id, EntityId(3));
            assert_eq!(added[1].prefab, "Traveller");
            assert_eq!(added[1].tag, "Player");

            let session = h.server.session(P1).expect("session");
            assert_eq!(session.sync.cursor(), 2);
            assert!(session.sync.is_synced(h.server.script()));
            assert_eq!(session.player_entity, Some(EntityId(3)));
            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn synced_peer_ignores_further_acks() -> anyhow::Result<()> {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let mut h = Harness::new(test_config(), &one_island_world(), ItemCatalog::default());
            h.onboard(P1).await?;

            h.ack_entity(P1).await?;
            h.ack_entity(P1).await?;
            h.ack_asset(P1).await?;
            tokio::time::sleep(Duration::from_secs(10)).await;

            let added = h.added_entities(P1)?;
            let homes = added.iter().filter(|op| op.entity_id == EntityId(2)).count();
            let players = added.iter().filter(|op| op.tag == "Player").count();
            assert_eq!(homes, 1);
            assert_eq!(players, 1);
            assert_eq!(h.sent_ops::<AssetLoadRequestOp>(P1, Channel::AssetLoadRequest)?.len(), 1);
            assert_eq!(h.server.session(P1).map(|s| s.sync.cursor()), Some(2));
            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn each_ack_moves_the_cursor_once() -> anyhow::Result<()> {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            // GlobalEntity, Traveller, the island prefab, home, player.
            let cfg = ServerConfig {
                weather_seed: Some(7),
                poll_timeout_ms: 5,
                ..Default::default()
            };
            let mut h = Harness::new(cfg, &one_island_world(), ItemCatalog::default());
            assert_eq!(h.server.script().len(), 5);
            assert_eq!(
                h.server.script().step(1).map(|s| s.action.clone()),
                Some(SyncAction::LoadAsset {
                    asset: "Traveller".to_string(),
                    context: "Player".to_string(),
                })
            );

            h.connect(P1).await?;
            h.transport.push_packet(P1, Channel::AssetLoadRequest.as_u8(), &b"{}"[..]);
            h.transport.push_packet(P1, Channel::AssetLoadRequest.as_u8(), &b"{}"[..]);
            h.pump().await?;

            let assets: Vec<String> = h
                .sent_ops::<AssetLoadRequestOp>(P1, Channel::AssetLoadRequest)?
                .into_iter()
                .map(|op| op.asset)
                .collect();
            assert_eq!(assets, vec!["GlobalEntity", "Traveller", ISLAND_PREFAB]);
            assert_eq!(h.server.session(P1).map(|s| s.sync.cursor()), Some(2));
            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn acks_only_move_the_sending_peer() -> anyhow::Result<()> {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let mut h = Harness::new(test_config(), &one_island_world(), ItemCatalog::default());
            h.connect(P1).await?;
            h.connect(P2).await?;
            assert_eq!(h.server.session_count(), 2);

            h.ack_asset(P1).await?;
            assert_eq!(h.server.session(P1).map(|s| s.sync.cursor()), Some(1));
            assert_eq!(h.server.session(P2).map(|s| s.sync.cursor()), Some(0));
            assert!(h.added_entities(P2)?.is_empty());

            h.ack_asset(P2).await?;
            h.ack_entity(P2).await?;
            h.ack_entity(P1).await?;

            // Entity ids are allocated in the order the steps ran.
            let player = |peer| h.server.session(peer).and_then(|s| s.player_entity);
            assert_eq!(player(P2), Some(EntityId(4)));
            assert_eq!(player(P1), Some(EntityId(5)));
            Ok::<(), anyhow::Error>(())
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn disconnect_drops_session_and_stream() -> anyhow::Result<()> {
    init_tracing();
    LocalSet::new()
        .run_until(async {
            let mut h = Harness::new(test_config(), &one_island_world(), ItemCatalog::default());
            let player = h.onboard(P1).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(h.streamed_ids(P1)?, vec![1]);
            assert!(h.server.context().spawn_tasks.borrow().is_running(player));

            h.disconnect(P1).await?;
            assert!(h.server.session(P1).is_none());
            assert!(!h.server.context().spawn_tasks.borrow().is_running(player));

            h.connect(P1).await?;
            let session = h.server.session(P1).expect("session");
            assert_eq!(session.sync.cursor(), 0);
            assert_eq!(session.player_entity, None);
            assert_eq!(h.sent_ops::<AssetLoadRequestOp>(P1, Channel::AssetLoadRequest)?.len(), 2);
            Ok::<(), anyhow::Error>(())
        })
        .await
}
