//! Position-keyed index of the chunks loaded in a world.
//!
//! Chunks live in an arena keyed by [`ChunkId`]; positions map to ids. Neighbor
//! links are ids too, so a removed neighbor can never be reached through a
//! stale reference.

use cubeworks_config::WorldConfig;
use cubeworks_voxel::{CHUNK_SIZE, Face, chunk_pos_of, neighbor_chunk_pos};
use glam::IVec3;
use rustc_hash::FxHashMap;

use crate::chunk::{Chunk, ChunkId, SharedBlocks};
use crate::stage::Stage;

/// Result of [`WorldChunks::create_or_get`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(ChunkId),
    Existing(ChunkId),
    OutOfBounds,
}

impl CreateOutcome {
    pub fn id(self) -> Option<ChunkId> {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::Existing(id) => Some(id),
            CreateOutcome::OutOfBounds => None,
        }
    }

    pub fn was_created(self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Snapshot of a chunk's neighbors taken before its stages run.
#[derive(Default)]
pub(crate) struct NeighborView {
    pub blocks: [Option<SharedBlocks>; 6],
    /// Every linked neighbor completed `Generate`.
    pub generated: bool,
}

pub struct WorldChunks {
    by_pos: FxHashMap<IVec3, ChunkId>,
    chunks: FxHashMap<ChunkId, Chunk>,
    next_id: u64,
    /// Inclusive bounds in cells, both multiples of `CHUNK_SIZE`.
    min: IVec3,
    max: IVec3,
}

impl WorldChunks {
    /// Bounds are inclusive and given in chunk units.
    pub fn new(min_chunk: IVec3, max_chunk: IVec3) -> Self {
        Self {
            by_pos: FxHashMap::default(),
            chunks: FxHashMap::default(),
            next_id: 0,
            min: min_chunk.min(max_chunk) * CHUNK_SIZE,
            max: min_chunk.max(max_chunk) * CHUNK_SIZE,
        }
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        Self::new(
            IVec3::from_array(config.min_chunk),
            IVec3::from_array(config.max_chunk),
        )
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the chunk containing `pos` lies inside the world limits.
    pub fn in_bounds(&self, pos: IVec3) -> bool {
        let key = chunk_pos_of(pos);
        key.cmpge(self.min).all() && key.cmple(self.max).all()
    }

    // --- lookup ---

    pub fn id_at(&self, pos: IVec3) -> Option<ChunkId> {
        self.by_pos.get(&chunk_pos_of(pos)).copied()
    }

    /// Chunk containing the cell or chunk position `pos`.
    pub fn get(&self, pos: IVec3) -> Option<&Chunk> {
        self.id_at(pos).and_then(|id| self.chunks.get(&id))
    }

    pub fn get_mut(&mut self, pos: IVec3) -> Option<&mut Chunk> {
        let id = self.id_at(pos)?;
        self.chunks.get_mut(&id)
    }

    pub fn get_by_id(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn get_by_id_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(&id)
    }

    /// Ids of every chunk, in creation order.
    pub fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.chunks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    // --- mutation ---

    /// Returns the chunk at `pos`, creating and linking it if needed.
    pub fn create_or_get(&mut self, pos: IVec3) -> CreateOutcome {
        let key = chunk_pos_of(pos);
        if let Some(&id) = self.by_pos.get(&key) {
            return CreateOutcome::Existing(id);
        }
        if !self.in_bounds(key) {
            return CreateOutcome::OutOfBounds;
        }
        let id = self.insert(Chunk::new(ChunkId(0), key));
        tracing::trace!(chunk = ?key, %id, "chunk created");
        CreateOutcome::Created(id)
    }

    /// Places `chunk` at the chunk containing `pos`, replacing (and removing)
    /// any chunk already there. Returns the id assigned to it, or `None`
    /// outside the world limits.
    pub fn set(&mut self, pos: IVec3, mut chunk: Chunk) -> Option<ChunkId> {
        let key = chunk_pos_of(pos);
        if !self.in_bounds(key) {
            return None;
        }
        if let Some(old) = self.id_at(key) {
            self.remove_chunk(old);
        }
        chunk.pos = key;
        Some(self.insert(chunk))
    }

    fn insert(&mut self, mut chunk: Chunk) -> ChunkId {
        let id = ChunkId(self.next_id);
        self.next_id += 1;
        chunk.id = id;
        self.by_pos.insert(chunk.pos(), id);
        self.chunks.insert(id, chunk);
        self.subscribe_neighbors(id, true);
        id
    }

    /// Unlinks, resets and drops a chunk.
    pub fn remove_chunk(&mut self, id: ChunkId) -> Option<Chunk> {
        self.subscribe_neighbors(id, false);
        let mut chunk = self.chunks.remove(&id)?;
        if self.by_pos.get(&chunk.pos()) == Some(&id) {
            self.by_pos.remove(&chunk.pos());
        }
        chunk.reset();
        tracing::trace!(chunk = ?chunk.pos(), %id, "chunk removed");
        Some(chunk)
    }

    /// Links (or unlinks) `id` with every existing neighbor, on both sides.
    pub fn subscribe_neighbors(&mut self, id: ChunkId, subscribe: bool) {
        let Some(pos) = self.chunks.get(&id).map(Chunk::pos) else {
            return;
        };
        for face in Face::ALL {
            let neighbor = if subscribe {
                self.by_pos.get(&neighbor_chunk_pos(pos, face)).copied()
            } else {
                self.chunks.get(&id).and_then(|c| c.state.neighbor(face))
            };
            let Some(neighbor) = neighbor.filter(|&n| n != id) else {
                continue;
            };
            let link = subscribe.then_some(id);
            if let Some(other) = self.chunks.get_mut(&neighbor) {
                other.state.set_neighbor(face.opposite(), link);
            }
            if let Some(chunk) = self.chunks.get_mut(&id) {
                chunk.state.set_neighbor(face, subscribe.then_some(neighbor));
            }
        }
    }

    pub(crate) fn neighbor_view(&self, id: ChunkId) -> NeighborView {
        let mut view = NeighborView {
            generated: true,
            ..NeighborView::default()
        };
        let Some(chunk) = self.chunks.get(&id) else {
            view.generated = false;
            return view;
        };
        for face in Face::ALL {
            let Some(neighbor) = chunk.state.neighbor(face).and_then(|n| self.chunks.get(&n)) else {
                continue;
            };
            view.generated &= neighbor.state.is_completed(Stage::Generate);
            view.blocks[face.index()] = Some(neighbor.blocks.clone());
        }
        view
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> WorldChunks {
        WorldChunks::new(IVec3::splat(-2), IVec3::splat(2))
    }

    #[test]
    fn test_create_or_get_normalizes_position() {
        let mut chunks = index();
        let created = chunks.create_or_get(IVec3::new(17, -1, 3));
        assert!(created.was_created());
        let id = created.id().unwrap();

        assert_eq!(chunks.create_or_get(IVec3::new(31, -16, 0)), CreateOutcome::Existing(id));
        assert_eq!(chunks.get(IVec3::new(20, -5, 15)).unwrap().pos(), IVec3::new(16, -16, 0));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut chunks = index();
        assert_eq!(chunks.create_or_get(IVec3::new(3 * 16, 0, 0)), CreateOutcome::OutOfBounds);
        assert_eq!(chunks.create_or_get(IVec3::new(0, -2 * 16 - 1, 0)), CreateOutcome::OutOfBounds);
        assert!(chunks.create_or_get(IVec3::new(2 * 16 + 15, 0, 0)).was_created());
        assert!(chunks.set(IVec3::splat(100), Chunk::new(ChunkId(0), IVec3::ZERO)).is_none());
        assert!(chunks.get(IVec3::splat(100)).is_none());
    }

    #[test]
    fn test_neighbors_link_symmetrically() {
        let mut chunks = index();
        let center = chunks.create_or_get(IVec3::ZERO).id().unwrap();
        let east = chunks.create_or_get(IVec3::new(16, 0, 0)).id().unwrap();
        let below = chunks.create_or_get(IVec3::new(0, -16, 0)).id().unwrap();
        // diagonal, not a face neighbor
        let diagonal = chunks.create_or_get(IVec3::new(16, 16, 0)).id().unwrap();

        let c = chunks.get_by_id(center).unwrap().state();
        assert_eq!(c.neighbor(Face::PosX), Some(east));
        assert_eq!(c.neighbor(Face::NegY), Some(below));
        assert_eq!(c.listener_count(), 2);
        let e = chunks.get_by_id(east).unwrap().state();
        assert_eq!(e.neighbor(Face::NegX), Some(center));
        assert_eq!(e.neighbor(Face::PosY), Some(diagonal));
    }

    #[test]
    fn test_remove_unlinks_neighbors() {
        let mut chunks = index();
        let center = chunks.create_or_get(IVec3::ZERO).id().unwrap();
        let east = chunks.create_or_get(IVec3::new(16, 0, 0)).id().unwrap();

        let removed = chunks.remove_chunk(east).unwrap();
        assert_eq!(removed.state().listener_count(), 0);
        assert!(chunks.get(IVec3::new(16, 0, 0)).is_none());
        assert_eq!(chunks.get_by_id(center).unwrap().state().listener_count(), 0);

        // ids are never reused
        let again = chunks.create_or_get(IVec3::new(16, 0, 0)).id().unwrap();
        assert_ne!(again, east);
    }

    #[test]
    fn test_set_replaces_existing_chunk() {
        let mut chunks = index();
        let first = chunks.create_or_get(IVec3::ZERO).id().unwrap();
        let replaced = chunks
            .set(IVec3::new(5, 5, 5), Chunk::new(ChunkId(0), IVec3::splat(99)))
            .unwrap();
        assert_ne!(first, replaced);
        assert!(chunks.get_by_id(first).is_none());
        assert_eq!(chunks.get(IVec3::ZERO).unwrap().id(), replaced);
        assert_eq!(chunks.get_by_id(replaced).unwrap().pos(), IVec3::ZERO);
    }

    #[test]
    fn test_neighbor_view_reports_generation() {
        let mut chunks = index();
        let center = chunks.create_or_get(IVec3::ZERO).id().unwrap();
        let east = chunks.create_or_get(IVec3::new(16, 0, 0)).id().unwrap();

        let view = chunks.neighbor_view(center);
        assert!(!view.generated);
        assert!(view.blocks[Face::PosX.index()].is_some());
        assert!(view.blocks[Face::NegX.index()].is_none());

        chunks.get_by_id_mut(east).unwrap().state_mut().complete(Stage::Generate);
        assert!(chunks.neighbor_view(center).generated);
    }
}
