//! Tests for the chunk block store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::IVec3;

use super::*;
use crate::behavior::{BlockBehavior, GrowingBlock};
use crate::coords::{CHUNK_EDGE, padded_coords};
use crate::registry::BlockTypeDef;

const ALL_LINKED: u8 = 0x3f;

fn registry() -> BlockRegistry {
    let mut reg = BlockRegistry::new();
    reg.register(BlockTypeDef::solid("stone")).unwrap();
    reg.register(BlockTypeDef::solid("dirt")).unwrap();
    reg
}

fn stone(reg: &BlockRegistry) -> BlockData {
    reg.block_by_name("stone").unwrap()
}

fn counted_store() -> ChunkBlocks {
    let mut blocks = ChunkBlocks::new();
    blocks.recalculate_empty_blocks();
    blocks
}

#[derive(Default)]
struct CountingHooks {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl BlockBehavior for CountingHooks {
    fn on_create(&self, _ctx: &mut BlockHookContext<'_>) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn on_destroy(&self, _ctx: &mut BlockHookContext<'_>) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

// --- counting ---

#[test]
fn test_set_inner_tracks_count_exactly() {
    let reg = registry();
    let mut blocks = counted_store();
    let index = padded_index(IVec3::new(3, 3, 3));

    blocks.set_inner(index, stone(&reg));
    assert_eq!(blocks.non_empty_blocks(), Some(1));

    // same type: no-op
    blocks.set_inner(index, stone(&reg).with_rotation(crate::Direction::East));
    assert_eq!(blocks.non_empty_blocks(), Some(1));
    assert_eq!(blocks.get(index).rotation(), crate::Direction::Up);

    blocks.set_inner(index, reg.block_by_name("dirt").unwrap());
    assert_eq!(blocks.non_empty_blocks(), Some(1));

    blocks.set_inner(index, BlockData::AIR);
    assert_eq!(blocks.non_empty_blocks(), Some(0));
    assert_eq!(blocks.count_non_empty(), 0);
}

#[test]
fn test_padding_writes_do_not_count() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.set_inner(padded_index(IVec3::new(-1, 5, 5)), stone(&reg));
    assert_eq!(blocks.non_empty_blocks(), Some(0));
}

#[test]
fn test_set_raw_skips_accounting_until_recount() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.set_raw(padded_index(IVec3::new(1, 1, 1)), stone(&reg));
    assert_eq!(blocks.non_empty_blocks(), Some(0));

    // recount is a no-op while the count is known
    blocks.recalculate_empty_blocks();
    assert_eq!(blocks.non_empty_blocks(), Some(0));

    blocks.invalidate_count();
    blocks.recalculate_empty_blocks();
    assert_eq!(blocks.non_empty_blocks(), Some(1));
}

#[test]
fn test_unknown_count_stays_unknown_on_set_inner() {
    let reg = registry();
    let mut blocks = ChunkBlocks::new();
    blocks.set_inner(padded_index(IVec3::ZERO), stone(&reg));
    assert_eq!(blocks.non_empty_blocks(), None);
}

#[test]
fn test_set_range_counts_every_cell() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.set_range(IVec3::new(2, 0, 2), IVec3::new(0, 1, 0), stone(&reg));
    assert_eq!(blocks.non_empty_blocks(), Some(18));
    assert_eq!(blocks.count_non_empty(), 18);
}

// --- queued edits ---

#[test]
fn test_modify_short_circuits_on_equal_type() {
    let reg = registry();
    let mut blocks = counted_store();
    let local = IVec3::new(4, 4, 4);
    blocks.set_inner(padded_index(local), stone(&reg));

    blocks.modify(local, stone(&reg).with_rotation(crate::Direction::North), true);
    assert_eq!(blocks.pending_edits(), 0);

    let applied = blocks.apply_queued_edits(&reg, IVec3::ZERO, ALL_LINKED);
    assert_eq!(applied.cells, 0);
    assert!(!blocks.geometry_mask().is_requested());
}

#[test]
fn test_modify_range_always_queues() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.modify_range(IVec3::ZERO, IVec3::new(1, 0, 0), BlockData::AIR, false);
    assert_eq!(blocks.pending_edits(), 1);
}

#[test]
fn test_apply_interior_edit_arms_self_rebuild_only() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.modify(IVec3::new(5, 5, 5), stone(&reg), true);

    let applied = blocks.apply_queued_edits(&reg, IVec3::new(16, 0, 0), ALL_LINKED);
    assert_eq!(
        applied.changed,
        vec![ChangedCell {
            local: IVec3::new(5, 5, 5),
            block: stone(&reg),
            source: EditSource::Local,
        }]
    );
    assert!(applied.edge_writes.is_empty());
    assert_eq!(blocks.geometry_mask().neighbor_bits(), 0);
    assert!(blocks.geometry_mask().is_requested());
    assert!(blocks.collider_mask().is_requested());
    assert!(blocks.needs_bounds_recalculation());
    assert_eq!(blocks.modified_indices(), vec![padded_index(IVec3::new(5, 5, 5)) as u16]);
    assert_eq!(blocks.pending_edits(), 0);
}

#[test]
fn test_unmarked_edit_is_not_recorded() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.set_bounds_recalculation(false);
    blocks.modify(IVec3::new(5, 5, 5), stone(&reg), false);
    let applied = blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    assert!(applied.changed.is_empty());
    assert!(!blocks.has_modifications());
    assert!(!blocks.needs_bounds_recalculation());
    assert_eq!(blocks.non_empty_blocks(), Some(1));
}

#[test]
fn test_boundary_edit_mirrors_into_linked_neighbors() {
    let reg = registry();
    let mut blocks = counted_store();
    let corner = IVec3::new(CHUNK_EDGE, 0, 7);
    blocks.modify(corner, stone(&reg), true);

    let linked = Face::PosX.bit(); // NegY neighbor not subscribed
    let applied = blocks.apply_queued_edits(&reg, IVec3::ZERO, linked);

    assert_eq!(applied.edge_writes.len(), 1);
    let write = applied.edge_writes[0];
    assert_eq!(write.face, Face::PosX);
    assert_eq!(padded_coords(write.index), IVec3::new(-1, 0, 7));
    assert!(blocks.geometry_mask().contains(Face::PosX));
    assert!(!blocks.geometry_mask().contains(Face::NegY));
    // collider mask picks up the geometry bits
    assert!(blocks.collider_mask().contains(Face::PosX));
}

#[test]
fn test_range_edit_spanning_two_faces() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.modify_range(IVec3::new(0, 3, 0), IVec3::new(CHUNK_EDGE, 3, 0), stone(&reg), true);
    let applied = blocks.apply_queued_edits(&reg, IVec3::ZERO, ALL_LINKED);

    assert_eq!(applied.cells, 16);
    let bits = blocks.geometry_mask().neighbor_bits();
    assert_eq!(bits, Face::PosX.bit() | Face::NegX.bit() | Face::NegZ.bit());
    // every cell sits on NegZ, the two ends also on NegX / PosX
    assert_eq!(applied.edge_writes.len(), 18);
}

#[test]
fn test_hooks_run_destroy_then_create() {
    let hooks = Arc::new(CountingHooks::default());
    let mut reg = BlockRegistry::new();
    let hooked = reg
        .register_with_behavior(BlockTypeDef::solid("hooked"), hooks.clone())
        .unwrap();
    let mut blocks = counted_store();

    blocks.modify(IVec3::new(1, 1, 1), reg.block(hooked), true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    assert_eq!(hooks.created.load(Ordering::Relaxed), 1);
    assert_eq!(hooks.destroyed.load(Ordering::Relaxed), 0);

    blocks.modify(IVec3::new(1, 1, 1), BlockData::AIR, true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    assert_eq!(hooks.destroyed.load(Ordering::Relaxed), 1);
}

#[test]
fn test_random_update_queues_growth_for_next_tick() {
    let mut reg = BlockRegistry::new();
    let grown = reg.register(BlockTypeDef::decoration("grown")).unwrap();
    let sapling = reg
        .register_with_behavior(
            BlockTypeDef::decoration("sapling"),
            Arc::new(GrowingBlock::new(BlockData::of_type(grown))),
        )
        .unwrap();
    let mut blocks = counted_store();
    let local = IVec3::new(2, 2, 2);
    blocks.set_inner(padded_index(local), reg.block(sapling));

    blocks.random_update(&reg, IVec3::ZERO, local);
    assert_eq!(blocks.get_at(local).block_type(), sapling);
    assert_eq!(blocks.pending_edits(), 1);

    blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    assert_eq!(blocks.get_at(local).block_type(), grown);
    assert_eq!(blocks.get_block_type(&reg, local).name, "grown");
}

// --- rebuild throttling ---

#[test]
fn test_geometry_requests_throttled() {
    let reg = registry();
    let mut blocks = counted_store();
    let throttle = RebuildThrottle::default();

    blocks.modify(IVec3::new(CHUNK_EDGE, 5, 5), stone(&reg), true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, ALL_LINKED);
    let first = blocks.schedule_rebuilds(1_000, false, throttle);
    assert_eq!(first.geometry, Some(Face::PosX.bit()));
    assert_eq!(first.collider, None);
    assert!(!blocks.geometry_mask().is_requested());

    blocks.modify(IVec3::new(5, 5, 5), stone(&reg), true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, ALL_LINKED);
    assert_eq!(blocks.schedule_rebuilds(1_050, false, throttle).geometry, None);
    assert!(blocks.geometry_mask().is_requested());
    assert_eq!(blocks.schedule_rebuilds(1_100, false, throttle).geometry, Some(0));
}

#[test]
fn test_collider_requests_gated_and_throttled() {
    let reg = registry();
    let mut blocks = counted_store();
    let throttle = RebuildThrottle::default();

    blocks.modify(IVec3::new(3, 3, 3), stone(&reg), true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    assert_eq!(blocks.schedule_rebuilds(0, false, throttle).collider, None);
    assert_eq!(blocks.schedule_rebuilds(10, true, throttle).collider, Some(0));

    blocks.request_collider();
    assert_eq!(blocks.schedule_rebuilds(200, true, throttle).collider, None);
    assert_eq!(blocks.schedule_rebuilds(260, true, throttle).collider, Some(0));
}

// --- copy / reset ---

#[test]
fn test_copy_from_slab() {
    let reg = registry();
    let mut src = counted_store();
    src.set_range(IVec3::new(-1, 0, -1), IVec3::new(CHUNK_SIZE, 0, CHUNK_SIZE), stone(&reg));
    let mut dst = counted_store();

    let from = padded_index(IVec3::new(-1, 0, -1));
    let to = padded_index(IVec3::new(-1, CHUNK_SIZE, -1));
    dst.copy_from(&src, from, to, crate::coords::PADDED_AREA);
    assert_eq!(dst.get_at(IVec3::new(7, CHUNK_SIZE, 7)), stone(&reg));
    assert_eq!(dst.get_at(IVec3::new(7, CHUNK_SIZE - 1, 7)), BlockData::AIR);
}

#[test]
fn test_queued_edits_keep_their_source() {
    let reg = registry();
    let mut blocks = counted_store();
    let cell = IVec3::new(4, 5, 6);
    let dirt = reg.block_by_name("dirt").unwrap();
    blocks.modify_from(cell, stone(&reg), true, EditSource::Peer(Some(7)));
    blocks.modify_from(cell, dirt, true, EditSource::Peer(Some(9)));
    blocks.modify(IVec3::new(1, 1, 1), stone(&reg), true);

    let applied = blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    let sources: Vec<_> = applied.changed.iter().map(|c| (c.block, c.source)).collect();
    assert_eq!(
        sources,
        vec![
            (stone(&reg), EditSource::Peer(Some(7))),
            (dirt, EditSource::Peer(Some(9))),
            (stone(&reg), EditSource::Local),
        ]
    );
    assert_eq!(blocks.get_at(cell), dirt);
}

#[test]
fn test_reset_clears_everything() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.modify(IVec3::new(1, 2, 3), stone(&reg), true);
    blocks.apply_queued_edits(&reg, IVec3::ZERO, 0);
    blocks.modify(IVec3::new(4, 4, 4), stone(&reg), true);

    blocks.reset();
    assert_eq!(blocks.non_empty_blocks(), None);
    assert_eq!(blocks.pending_edits(), 0);
    assert!(!blocks.has_modifications());
    assert!(blocks.needs_bounds_recalculation());
    assert!(!blocks.geometry_mask().is_requested());
    assert!(blocks.cells().iter().all(|c| c.is_air()));
}

// --- network receive ---

#[test]
fn test_fragmented_snapshot_matches_direct_deserialize() {
    let reg = registry();
    let mut source = counted_store();
    source.set_range(IVec3::ZERO, IVec3::new(CHUNK_EDGE, 2, CHUNK_EDGE), stone(&reg));
    source.set_range(IVec3::new(0, 3, 0), IVec3::new(3, 9, 3), reg.block_by_name("dirt").unwrap());
    let payload = source.serialize();

    let header = 4;
    let per_fragment = payload.len().div_ceil(3);
    let fragments =
        crate::transfer::fragment_payload(&payload, header, header + 8 + per_fragment).unwrap();
    assert_eq!(fragments.len(), 3);

    let mut received = ChunkBlocks::new();
    assert_eq!(received.receive_fragment(&fragments[0], header), Ok(ReceiveProgress::Pending));
    assert!(received.is_receiving());
    assert_eq!(received.receive_fragment(&fragments[1], header), Ok(ReceiveProgress::Pending));
    assert_eq!(received.receive_fragment(&fragments[2], header), Ok(ReceiveProgress::Complete));
    assert!(!received.is_receiving());

    let mut direct = ChunkBlocks::new();
    direct.deserialize(&payload).unwrap();
    assert_eq!(received.cells(), direct.cells());
    assert_eq!(received.non_empty_blocks(), direct.non_empty_blocks());
}

#[test]
fn test_malformed_received_snapshot_resets_store() {
    let reg = registry();
    let mut blocks = counted_store();
    blocks.set_inner(padded_index(IVec3::ONE), stone(&reg));

    // count says non-empty but no runs follow
    let payload = 5i32.to_le_bytes().to_vec();
    let fragments = crate::transfer::fragment_payload(&payload, 0, 64).unwrap();
    assert_eq!(blocks.receive_fragment(&fragments[0], 0), Ok(ReceiveProgress::Reset));
    assert_eq!(blocks.non_empty_blocks(), None);
    assert!(blocks.get_at(IVec3::ONE).is_air());
}
