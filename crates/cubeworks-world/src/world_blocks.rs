//! Block access in world coordinates.
//!
//! Positions are split into a chunk position and a local offset with floor
//! division, so negative coordinates land in the chunk below them. Reads of
//! unloaded chunks return air; writes to them are dropped and reported as
//! `false`.

use cubeworks_voxel::{
    BlockData, BlockRegistry, BlockTypeDef, CHUNK_EDGE, CHUNK_SIZE, ChunkBlocks, chunk_pos_of,
    local_of, padded_index,
};
use glam::IVec3;

use crate::world_chunks::WorldChunks;

/// Borrowed view over a world's chunks. Each call locks one chunk store at a
/// time.
#[derive(Clone, Copy)]
pub struct WorldBlocks<'a> {
    chunks: &'a WorldChunks,
    registry: &'a BlockRegistry,
}

impl<'a> WorldBlocks<'a> {
    pub fn new(chunks: &'a WorldChunks, registry: &'a BlockRegistry) -> Self {
        Self { chunks, registry }
    }

    pub fn get(&self, global: IVec3) -> BlockData {
        self.chunks
            .get(global)
            .map(|chunk| chunk.blocks().read().get_at(local_of(global)))
            .unwrap_or(BlockData::AIR)
    }

    pub fn get_block_type(&self, global: IVec3) -> &'a BlockTypeDef {
        self.registry.def_or_air(self.get(global).block_type())
    }

    /// Immediate write with non-empty accounting. No hooks, no mirroring.
    pub fn set_inner(&self, global: IVec3, block: BlockData) -> bool {
        self.with_chunk(global, |blocks, local| blocks.set_inner(padded_index(local), block))
    }

    /// Immediate write without any accounting.
    pub fn set_raw(&self, global: IVec3, block: BlockData) -> bool {
        self.with_chunk(global, |blocks, local| blocks.set_raw(padded_index(local), block))
    }

    /// [`WorldBlocks::set_inner`] over an inclusive box that may span chunks.
    /// Returns how many loaded chunks were touched.
    pub fn set_range(&self, from: IVec3, to: IVec3, block: BlockData) -> usize {
        self.for_each_chunk_box(from, to, |blocks, lo, hi| blocks.set_range(lo, hi, block))
    }

    /// Queues an edit applied on the next tick.
    pub fn modify(&self, global: IVec3, block: BlockData, mark_modified: bool) -> bool {
        self.with_chunk(global, |blocks, local| blocks.modify(local, block, mark_modified))
    }

    /// Queues a box edit, one queued range per touched chunk.
    pub fn modify_range(
        &self,
        from: IVec3,
        to: IVec3,
        block: BlockData,
        mark_modified: bool,
    ) -> usize {
        self.for_each_chunk_box(from, to, |blocks, lo, hi| {
            blocks.modify_range(lo, hi, block, mark_modified)
        })
    }

    fn with_chunk(&self, global: IVec3, write: impl FnOnce(&mut ChunkBlocks, IVec3)) -> bool {
        let Some(chunk) = self.chunks.get(global) else {
            tracing::trace!(pos = ?global, "write to unloaded chunk dropped");
            return false;
        };
        write(&mut *chunk.blocks().write(), local_of(global));
        true
    }

    fn for_each_chunk_box(
        &self,
        from: IVec3,
        to: IVec3,
        mut write: impl FnMut(&mut ChunkBlocks, IVec3, IVec3),
    ) -> usize {
        let (from, to) = (from.min(to), from.max(to));
        let (first, last) = (chunk_pos_of(from), chunk_pos_of(to));
        let step = CHUNK_SIZE as usize;

        let mut touched = 0;
        for cy in (first.y..=last.y).step_by(step) {
            for cz in (first.z..=last.z).step_by(step) {
                for cx in (first.x..=last.x).step_by(step) {
                    let chunk_pos = IVec3::new(cx, cy, cz);
                    let Some(chunk) = self.chunks.get(chunk_pos) else {
                        continue;
                    };
                    let lo = from.max(chunk_pos) - chunk_pos;
                    let hi = to.min(chunk_pos + IVec3::splat(CHUNK_EDGE)) - chunk_pos;
                    write(&mut *chunk.blocks().write(), lo, hi);
                    touched += 1;
                }
            }
        }
        touched
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
