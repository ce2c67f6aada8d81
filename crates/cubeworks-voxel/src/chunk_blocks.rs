//! Per-chunk block store: padded cell array, queued edits, non-empty
//! accounting and throttled rebuild requests.
//!
//! Edits from gameplay and the network are queued with [`ChunkBlocks::modify`]
//! and [`ChunkBlocks::modify_range`] and applied together once per tick by
//! [`ChunkBlocks::apply_queued_edits`]. Generation writes go straight to the
//! array through [`ChunkBlocks::set_inner`] and [`ChunkBlocks::set_raw`].

use glam::IVec3;
use rustc_hash::FxHashSet;

use crate::behavior::{BlockHookContext, FollowUpEdit};
use crate::block_data::{AIR_TYPE, BlockData};
use crate::coords::{
    CHUNK_SIZE, Face, PADDED_VOLUME, boundary_faces, is_inner_coord, is_padded_coord,
    neighbor_padding_index, padded_coords, padded_index,
};
use crate::registry::{BlockRegistry, BlockTypeDef};
use crate::transfer::{ChunkReceiver, ReceiveError};

// ---------------------------------------------------------------------------
// Rebuild masks
// ---------------------------------------------------------------------------

/// Pending rebuild request: `None` means nothing requested, `Some(bits)`
/// means rebuild this chunk plus every neighbor whose [`Face::bit`] is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildMask(Option<u8>);

impl RebuildMask {
    pub const NONE: RebuildMask = RebuildMask(None);
    const ALL_NEIGHBORS: u8 = 0x3f;

    pub fn is_requested(self) -> bool {
        self.0.is_some()
    }

    /// Requests a rebuild of this chunk alone if nothing is pending yet.
    pub fn arm(&mut self) {
        if self.0.is_none() {
            self.0 = Some(0);
        }
    }

    pub fn mark(&mut self, face: Face) {
        self.0 = Some(self.0.unwrap_or(0) | face.bit());
    }

    pub fn merge(&mut self, other: RebuildMask) {
        if let Some(bits) = other.0 {
            self.0 = Some(self.0.unwrap_or(0) | bits);
        }
    }

    pub fn contains(self, face: Face) -> bool {
        self.0.is_some_and(|bits| bits & face.bit() != 0)
    }

    pub fn is_all_neighbors(self) -> bool {
        self.0 == Some(Self::ALL_NEIGHBORS)
    }

    pub fn neighbor_bits(self) -> u8 {
        self.0.unwrap_or(0)
    }
}

/// Minimum intervals between two rebuild requests of the same kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildThrottle {
    pub geometry_ms: u64,
    pub collider_ms: u64,
}

impl Default for RebuildThrottle {
    fn default() -> Self {
        Self {
            geometry_ms: 100,
            collider_ms: 250,
        }
    }
}

/// Rebuilds released by [`ChunkBlocks::schedule_rebuilds`]. `Some(bits)` means
/// rebuild this chunk and the neighbors named by `bits`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildRequests {
    pub geometry: Option<u8>,
    pub collider: Option<u8>,
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EditTarget {
    Cell(IVec3),
    Range { from: IVec3, to: IVec3 },
}

/// Where a queued edit came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EditSource {
    /// Made on this instance.
    #[default]
    Local,
    /// Received from a peer. `Some` names the client the edit must not be
    /// relayed back to.
    Peer(Option<u64>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct QueuedEdit {
    target: EditTarget,
    block: BlockData,
    mark_modified: bool,
    source: EditSource,
}

/// A cell written by a marked edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangedCell {
    pub local: IVec3,
    pub block: BlockData,
    pub source: EditSource,
}

/// A boundary cell that must be copied into a neighbor's padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeWrite {
    /// Neighbor slot the write goes to.
    pub face: Face,
    /// Padded index inside the neighbor.
    pub index: usize,
    pub block: BlockData,
}

/// Outcome of one [`ChunkBlocks::apply_queued_edits`] pass.
#[derive(Debug, Default)]
pub struct AppliedEdits {
    /// Cells written with `mark_modified`, in application order.
    pub changed: Vec<ChangedCell>,
    /// Mirrors owed to subscribed neighbors.
    pub edge_writes: Vec<EdgeWrite>,
    /// Number of cells processed, marked or not.
    pub cells: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Block cells of one chunk plus a one-cell border mirrored from its neighbors.
pub struct ChunkBlocks {
    pub(crate) cells: Box<[BlockData]>,
    /// Non-air inner cells; `None` until recounted.
    pub(crate) non_empty: Option<u32>,
    edits: Vec<QueuedEdit>,
    modified: FxHashSet<u16>,
    recalculate_bounds: bool,
    geometry_mask: RebuildMask,
    collider_mask: RebuildMask,
    last_geometry_ms: Option<u64>,
    last_collider_ms: Option<u64>,
    receiver: ChunkReceiver,
}

impl ChunkBlocks {
    /// All-air store with an unknown non-empty count.
    pub fn new() -> Self {
        Self {
            cells: vec![BlockData::AIR; PADDED_VOLUME].into_boxed_slice(),
            non_empty: None,
            edits: Vec::new(),
            modified: FxHashSet::default(),
            recalculate_bounds: true,
            geometry_mask: RebuildMask::NONE,
            collider_mask: RebuildMask::NONE,
            last_geometry_ms: None,
            last_collider_ms: None,
            receiver: ChunkReceiver::new(),
        }
    }

    /// Returns the store to its freshly created state.
    pub fn reset(&mut self) {
        self.cells.fill(BlockData::AIR);
        self.non_empty = None;
        self.edits.clear();
        self.modified.clear();
        self.recalculate_bounds = true;
        self.geometry_mask = RebuildMask::NONE;
        self.collider_mask = RebuildMask::NONE;
        self.last_geometry_ms = None;
        self.last_collider_ms = None;
        self.receiver.reset();
    }

    // --- reads ---

    /// Cell at a padded index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= PADDED_VOLUME`.
    #[inline]
    pub fn get(&self, index: usize) -> BlockData {
        self.cells[index]
    }

    /// Cell at a padded local coordinate; air outside the padded bounds.
    pub fn get_at(&self, local: IVec3) -> BlockData {
        if !is_padded_coord(local) {
            tracing::warn!(?local, "ChunkBlocks::get_at out of bounds");
            return BlockData::AIR;
        }
        self.cells[padded_index(local)]
    }

    /// Registry definition of the cell at `local`.
    pub fn get_block_type<'r>(&self, registry: &'r BlockRegistry, local: IVec3) -> &'r BlockTypeDef {
        registry.def_or_air(self.get_at(local).block_type())
    }

    pub fn cells(&self) -> &[BlockData] {
        &self.cells
    }

    /// Non-air inner cells, or `None` while unknown.
    pub fn non_empty_blocks(&self) -> Option<u32> {
        self.non_empty
    }

    pub fn needs_bounds_recalculation(&self) -> bool {
        self.recalculate_bounds
    }

    pub fn set_bounds_recalculation(&mut self, needed: bool) {
        self.recalculate_bounds = needed;
    }

    pub fn geometry_mask(&self) -> RebuildMask {
        self.geometry_mask
    }

    pub fn collider_mask(&self) -> RebuildMask {
        self.collider_mask
    }

    pub fn pending_edits(&self) -> usize {
        self.edits.len()
    }

    // --- direct writes ---

    /// Writes a cell and keeps the non-empty count in step with air/non-air
    /// type changes of inner cells. Same-type writes are ignored.
    pub fn set_inner(&mut self, index: usize, block: BlockData) {
        let old = self.cells[index];
        if old.block_type() == block.block_type() {
            return;
        }
        self.cells[index] = block;

        if let Some(count) = self.non_empty.as_mut()
            && is_inner_coord(padded_coords(index))
        {
            let was_air = old.block_type() == AIR_TYPE;
            let is_air = block.block_type() == AIR_TYPE;
            if was_air && !is_air {
                *count += 1;
            } else if !was_air && is_air {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Writes a cell without any accounting. Callers recount afterwards via
    /// [`ChunkBlocks::recalculate_empty_blocks`] or [`ChunkBlocks::invalidate_count`].
    #[inline]
    pub fn set_raw(&mut self, index: usize, block: BlockData) {
        self.cells[index] = block;
    }

    /// [`ChunkBlocks::set_inner`] over an inclusive local box.
    pub fn set_range(&mut self, from: IVec3, to: IVec3, block: BlockData) {
        let (from, to) = (from.min(to), from.max(to));
        if !is_padded_coord(from) || !is_padded_coord(to) {
            tracing::warn!(?from, ?to, "ChunkBlocks::set_range out of bounds");
            return;
        }
        for_each_in_box(from, to, |local| self.set_inner(padded_index(local), block));
    }

    /// Copies `len` raw cells from `src` into this store.
    pub fn copy_from(&mut self, src: &ChunkBlocks, src_index: usize, dst_index: usize, len: usize) {
        self.cells[dst_index..dst_index + len]
            .copy_from_slice(&src.cells[src_index..src_index + len]);
    }

    /// Marks the non-empty count as unknown.
    pub fn invalidate_count(&mut self) {
        self.non_empty = None;
    }

    /// Recounts non-air inner cells if the count is unknown.
    pub fn recalculate_empty_blocks(&mut self) {
        if self.non_empty.is_none() {
            self.non_empty = Some(self.count_non_empty());
        }
    }

    /// Full scan of the inner cells.
    pub fn count_non_empty(&self) -> u32 {
        count_inner_non_empty(&self.cells)
    }

    // --- queued edits ---

    /// Queues a single-cell edit for the next tick. Dropped if the stored
    /// cell already has the same type.
    pub fn modify(&mut self, local: IVec3, block: BlockData, mark_modified: bool) {
        self.modify_from(local, block, mark_modified, EditSource::Local);
    }

    /// [`ChunkBlocks::modify`] for an edit whose origin must travel with it.
    pub fn modify_from(
        &mut self,
        local: IVec3,
        block: BlockData,
        mark_modified: bool,
        source: EditSource,
    ) {
        if !is_inner_coord(local) {
            tracing::warn!(?local, "ChunkBlocks::modify out of bounds");
            return;
        }
        if self.cells[padded_index(local)].block_type() == block.block_type() {
            return;
        }
        self.edits.push(QueuedEdit {
            target: EditTarget::Cell(local),
            block,
            mark_modified,
            source,
        });
    }

    /// Queues an inclusive box edit for the next tick. Always queued.
    pub fn modify_range(&mut self, from: IVec3, to: IVec3, block: BlockData, mark_modified: bool) {
        let (from, to) = (from.min(to), from.max(to));
        if !is_inner_coord(from) || !is_inner_coord(to) {
            tracing::warn!(?from, ?to, "ChunkBlocks::modify_range out of bounds");
            return;
        }
        self.edits.push(QueuedEdit {
            target: EditTarget::Range { from, to },
            block,
            mark_modified,
            source: EditSource::Local,
        });
    }

    /// Applies every queued edit in order.
    ///
    /// Each cell runs the old type's `on_destroy` and the new type's
    /// `on_create` hook before being written. Boundary cells produce
    /// [`EdgeWrite`]s for the neighbors named in `linked` (a [`Face::bit`] set)
    /// and flag those neighbors in the geometry mask. Follow-up edits
    /// requested by hooks are queued for the next pass.
    pub fn apply_queued_edits(
        &mut self,
        registry: &BlockRegistry,
        chunk_pos: IVec3,
        linked: u8,
    ) -> AppliedEdits {
        let mut applied = AppliedEdits::default();
        if self.edits.is_empty() {
            return applied;
        }

        self.geometry_mask.arm();
        self.collider_mask.arm();

        let edits = std::mem::take(&mut self.edits);
        let mut follow_ups = Vec::new();
        for edit in &edits {
            match edit.target {
                EditTarget::Cell(local) => {
                    self.apply_cell(registry, chunk_pos, local, edit, linked, &mut follow_ups, &mut applied);
                }
                EditTarget::Range { from, to } => {
                    for_each_in_box(from, to, |local| {
                        self.apply_cell(registry, chunk_pos, local, edit, linked, &mut follow_ups, &mut applied);
                    });
                }
            }
        }

        self.collider_mask.merge(self.geometry_mask);

        self.edits.extend(follow_ups.into_iter().map(|f| QueuedEdit {
            target: EditTarget::Cell(f.local),
            block: f.block,
            mark_modified: true,
            source: EditSource::Local,
        }));

        applied
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_cell(
        &mut self,
        registry: &BlockRegistry,
        chunk_pos: IVec3,
        local: IVec3,
        edit: &QueuedEdit,
        linked: u8,
        follow_ups: &mut Vec<FollowUpEdit>,
        applied: &mut AppliedEdits,
    ) {
        let index = padded_index(local);
        let old = self.cells[index];

        if let Some(hooks) = registry.behavior(old.block_type()) {
            hooks.on_destroy(&mut BlockHookContext::new(chunk_pos, local, old, follow_ups));
        }
        if let Some(hooks) = registry.behavior(edit.block.block_type()) {
            hooks.on_create(&mut BlockHookContext::new(chunk_pos, local, edit.block, follow_ups));
        }

        self.set_inner(index, edit.block);
        applied.cells += 1;

        if edit.mark_modified {
            self.modified.insert(index as u16);
            self.recalculate_bounds = true;
            applied.changed.push(ChangedCell {
                local,
                block: edit.block,
                source: edit.source,
            });
        }

        for face in boundary_faces(local) {
            if linked & face.bit() == 0 {
                continue;
            }
            self.geometry_mask.mark(face);
            applied.edge_writes.push(EdgeWrite {
                face,
                index: neighbor_padding_index(local, face),
                block: edit.block,
            });
        }
    }

    /// Runs the random-update hook of the cell at `local`. Requested edits
    /// are queued for the next tick.
    pub fn random_update(&mut self, registry: &BlockRegistry, chunk_pos: IVec3, local: IVec3) {
        if !is_inner_coord(local) {
            return;
        }
        let block = self.cells[padded_index(local)];
        let Some(hooks) = registry.behavior(block.block_type()) else {
            return;
        };
        let mut follow_ups = Vec::new();
        hooks.on_random_update(&mut BlockHookContext::new(chunk_pos, local, block, &mut follow_ups));
        for f in follow_ups {
            self.modify(f.local, f.block, true);
        }
    }

    /// Releases the pending rebuild requests whose throttle interval elapsed.
    ///
    /// The collider request is only released when `needs_collider` holds.
    pub fn schedule_rebuilds(
        &mut self,
        now_ms: u64,
        needs_collider: bool,
        throttle: RebuildThrottle,
    ) -> RebuildRequests {
        let mut requests = RebuildRequests::default();

        if self.geometry_mask.is_requested()
            && interval_elapsed(self.last_geometry_ms, now_ms, throttle.geometry_ms)
        {
            self.last_geometry_ms = Some(now_ms);
            requests.geometry = Some(self.geometry_mask.neighbor_bits());
            self.geometry_mask = RebuildMask::NONE;
        }

        if needs_collider
            && self.collider_mask.is_requested()
            && interval_elapsed(self.last_collider_ms, now_ms, throttle.collider_ms)
        {
            self.last_collider_ms = Some(now_ms);
            requests.collider = Some(self.collider_mask.neighbor_bits());
            self.collider_mask = RebuildMask::NONE;
        }

        requests
    }

    /// Requests a collider rebuild of this chunk on the next schedule pass.
    pub fn request_collider(&mut self) {
        self.collider_mask.arm();
    }

    // --- modified cells ---

    /// Padded indices written with `mark_modified`, ascending.
    pub fn modified_indices(&self) -> Vec<u16> {
        let mut indices: Vec<u16> = self.modified.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn mark_index_modified(&mut self, index: usize) {
        debug_assert!(index < PADDED_VOLUME);
        self.modified.insert(index as u16);
    }

    pub fn has_modifications(&self) -> bool {
        !self.modified.is_empty()
    }

    // --- network receive ---

    /// Feeds one snapshot fragment. On completion the payload is
    /// deserialized; a malformed payload resets the store.
    pub fn receive_fragment(
        &mut self,
        fragment: &[u8],
        header_size: usize,
    ) -> Result<ReceiveProgress, ReceiveError> {
        let Some(payload) = self.receiver.receive(fragment, header_size)? else {
            return Ok(ReceiveProgress::Pending);
        };
        match self.deserialize(&payload) {
            Ok(()) => Ok(ReceiveProgress::Complete),
            Err(err) => {
                tracing::warn!(error = %err, "received chunk snapshot rejected, resetting");
                self.reset();
                Ok(ReceiveProgress::Reset)
            }
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.receiver.is_receiving()
    }
}

impl Default for ChunkBlocks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChunkBlocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBlocks")
            .field("non_empty", &self.non_empty)
            .field("pending_edits", &self.edits.len())
            .field("modified", &self.modified.len())
            .field("geometry_mask", &self.geometry_mask)
            .field("collider_mask", &self.collider_mask)
            .finish()
    }
}

/// State of a fragmented snapshot after feeding one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveProgress {
    /// More fragments are expected.
    Pending,
    /// Snapshot assembled and applied.
    Complete,
    /// Snapshot assembled but malformed; the store was reset.
    Reset,
}

fn interval_elapsed(last: Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    last.is_none_or(|last| now_ms.saturating_sub(last) >= interval_ms)
}

/// Visits an inclusive box with x fastest and y slowest.
/// Non-air inner cells of a padded cell array.
pub(crate) fn count_inner_non_empty(cells: &[BlockData]) -> u32 {
    let mut count = 0;
    for_each_in_box(IVec3::ZERO, IVec3::splat(CHUNK_SIZE - 1), |local| {
        if !cells[padded_index(local)].is_air() {
            count += 1;
        }
    });
    count
}

pub(crate) fn for_each_in_box(from: IVec3, to: IVec3, mut visit: impl FnMut(IVec3)) {
    for y in from.y..=to.y {
        for z in from.z..=to.z {
            for x in from.x..=to.x {
                visit(IVec3::new(x, y, z));
            }
        }
    }
}

#[cfg(test)]
#[path = "chunk_blocks_tests.rs"]
mod tests;
