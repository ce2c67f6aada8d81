mod common;

use std::sync::Arc;

use common::{TIMEOUT, harness, test_config};
use cubeworks_config::{Config, NetworkConfig, NetworkRole};
use cubeworks_voxel::transfer::LEADER_FIELDS;
use cubeworks_voxel::{ChunkBlocks, ReceiveProgress, padded_index};
use cubeworks_world::{
    BlockEditMessage, ChannelBroadcaster, ChunkState, EditBroadcaster, Stage, WorldError,
    fragment_snapshot,
};
use crossbeam_channel::Receiver;
use glam::IVec3;

fn role_config(role: NetworkRole, allow_connections: bool) -> Config {
    let mut config = test_config();
    config.network.role = role;
    config.network.allow_connections = allow_connections;
    config
}

fn channel() -> (Option<Arc<dyn EditBroadcaster>>, Receiver<Vec<u8>>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (Some(Arc::new(ChannelBroadcaster::new(tx))), rx)
}

fn received(rx: &Receiver<Vec<u8>>) -> Vec<BlockEditMessage> {
    rx.try_iter()
        .map(|bytes| BlockEditMessage::decode(&bytes).unwrap())
        .collect()
}

#[test]
fn test_snapshot_arrives_in_three_fragments() {
    let mut h = harness(role_config(NetworkRole::Client, false), 0, None, None);

    let mut source = ChunkBlocks::new();
    for x in 0..16 {
        for z in (x % 2..16).step_by(2) {
            source.set_raw(padded_index(IVec3::new(x, 3, z)), h.stone);
        }
    }
    let payload_len = source.serialize().len();
    let header_size = h.world.config().network.header_size;
    let network = NetworkConfig {
        max_fragment_size: header_size + LEADER_FIELDS + payload_len.div_ceil(3),
        ..h.world.config().network.clone()
    };
    let fragments = fragment_snapshot(&source, &network).unwrap();
    assert_eq!(fragments.len(), 3);

    let pos = IVec3::new(0, 16, 0);
    let progress: Vec<ReceiveProgress> = fragments
        .iter()
        .map(|fragment| h.world.receive_chunk_fragment(pos, fragment).unwrap())
        .collect();
    assert_eq!(
        progress,
        vec![ReceiveProgress::Pending, ReceiveProgress::Pending, ReceiveProgress::Complete]
    );

    let chunk = h.world.chunk(pos).unwrap();
    assert_eq!(chunk.blocks().read().cells(), source.cells());
    assert_eq!(chunk.blocks().read().non_empty_blocks(), Some(128));
    let state = chunk.state();
    for stage in [Stage::LoadData, Stage::PrepareGenerate, Stage::Generate] {
        assert!(state.is_completed(stage), "{state}");
    }
    assert_eq!(state.next_state(), ChunkState::BuildVertices);

    h.world.tick();
    assert!(h.world.chunk(pos).unwrap().state().is_pending(Stage::BuildVertices));
    assert_eq!(h.terrain.calls(), 0);
}

#[test]
fn test_fragment_errors_are_reported() {
    let mut h = harness(role_config(NetworkRole::Client, false), 0, None, None);
    assert!(matches!(
        h.world.receive_chunk_fragment(IVec3::ZERO, &[0u8; 3]),
        Err(WorldError::Receive(_))
    ));
    assert!(matches!(
        h.world.receive_chunk_fragment(IVec3::splat(1000), &[0u8; 64]),
        Err(WorldError::OutOfBounds(_))
    ));
}

#[test]
fn test_server_broadcasts_local_and_relays_remote_edits() {
    let (broadcaster, rx) = channel();
    let mut h = harness(role_config(NetworkRole::Server, true), 0, None, broadcaster);
    h.world.create_chunk(IVec3::ZERO);
    assert!(h.world.tick_until(TIMEOUT, |world| {
        world.chunk(IVec3::ZERO).unwrap().state().is_completed(Stage::Generate)
    }));

    let stone = h.stone;
    h.world.blocks().modify(IVec3::new(1, 2, 3), stone, true);
    h.world.tick();
    assert_eq!(
        received(&rx),
        vec![BlockEditMessage::ServerBroadcast {
            pos: [1, 2, 3],
            block: stone.raw(),
            exclude: None
        }]
    );

    let from_client = BlockEditMessage::ClientChange {
        pos: [4, 5, 6],
        block: stone.raw(),
    };
    assert!(h.world.apply_remote_edit(from_client, Some(42)));
    h.world.tick();
    assert_eq!(h.world.blocks().get(IVec3::new(4, 5, 6)), stone);
    assert_eq!(
        received(&rx),
        vec![BlockEditMessage::ServerBroadcast {
            pos: [4, 5, 6],
            block: stone.raw(),
            exclude: Some(42)
        }]
    );

    // edits that do not mark the chunk modified stay silent
    h.world.blocks().modify(IVec3::new(9, 9, 9), stone, false);
    h.world.tick();
    assert!(received(&rx).is_empty());
}

#[test]
fn test_relayed_edits_skip_their_own_sender() {
    let (broadcaster, rx) = channel();
    let mut h = harness(role_config(NetworkRole::Server, true), 0, None, broadcaster);
    h.world.create_chunk(IVec3::ZERO);
    assert!(h.world.tick_until(TIMEOUT, |world| {
        world.chunk(IVec3::ZERO).unwrap().state().is_completed(Stage::Generate)
    }));

    let stone = h.stone;
    let edit = |block: u16| BlockEditMessage::ClientChange {
        pos: [4, 5, 6],
        block,
    };
    assert!(h.world.apply_remote_edit(edit(stone.raw()), Some(7)));
    assert!(h.world.apply_remote_edit(edit(5), Some(9)));
    h.world.tick();
    assert_eq!(
        received(&rx),
        vec![
            BlockEditMessage::ServerBroadcast {
                pos: [4, 5, 6],
                block: stone.raw(),
                exclude: Some(7)
            },
            BlockEditMessage::ServerBroadcast {
                pos: [4, 5, 6],
                block: 5,
                exclude: Some(9)
            },
        ]
    );

    // the server's own edit to the same cell reaches every client
    h.world.blocks().modify(IVec3::new(4, 5, 6), stone, true);
    h.world.tick();
    assert_eq!(
        received(&rx),
        vec![BlockEditMessage::ServerBroadcast {
            pos: [4, 5, 6],
            block: stone.raw(),
            exclude: None
        }]
    );
}

#[test]
fn test_client_forwards_local_edits_only() {
    let (broadcaster, rx) = channel();
    let mut h = harness(role_config(NetworkRole::Client, false), 0, None, broadcaster);
    h.world.create_chunk(IVec3::ZERO);
    assert!(h.world.tick_until(TIMEOUT, |world| {
        world.chunk(IVec3::ZERO).unwrap().state().is_completed(Stage::Generate)
    }));

    let stone = h.stone;
    let from_server = BlockEditMessage::ServerBroadcast {
        pos: [7, 7, 7],
        block: stone.raw(),
        exclude: None,
    };
    assert!(h.world.apply_remote_edit(from_server, None));
    h.world.tick();
    assert_eq!(h.world.blocks().get(IVec3::new(7, 7, 7)), stone);
    assert!(received(&rx).is_empty());

    h.world.blocks().modify(IVec3::new(8, 8, 8), stone, true);
    h.world.tick();
    assert_eq!(
        received(&rx),
        vec![BlockEditMessage::ClientChange {
            pos: [8, 8, 8],
            block: stone.raw()
        }]
    );
}

#[test]
fn test_standalone_never_broadcasts() {
    let (broadcaster, rx) = channel();
    let mut h = harness(test_config(), 0, None, broadcaster);
    h.world.create_chunk(IVec3::ZERO);
    assert!(h.world.tick_until(TIMEOUT, |world| {
        world.chunk(IVec3::ZERO).unwrap().state().is_completed(Stage::Generate)
    }));
    h.world.blocks().modify(IVec3::new(1, 1, 1), h.stone, true);
    h.world.tick();
    assert!(received(&rx).is_empty());
    assert!(!h.world.apply_remote_edit(
        BlockEditMessage::ClientChange {
            pos: [100, 0, 0],
            block: 1
        },
        Some(1)
    ));
}
