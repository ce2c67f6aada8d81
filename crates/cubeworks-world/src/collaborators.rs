//! Seams to the systems the pipeline drives but does not implement:
//! terrain generation and geometry/collider construction.
//!
//! Persistence and edit broadcast live in [`crate::persistence`] and
//! [`crate::net`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cubeworks_voxel::{BlockData, BlockRegistry, CHUNK_EDGE, CHUNK_SIZE, ChunkBlocks};
use glam::IVec3;

use crate::net::EditBroadcaster;
use crate::persistence::ChunkStorage;

/// Inclusive local box handed to geometry and collider builders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub min_z: i32,
    pub max_z: i32,
    /// Lowest Y layer that contains air.
    pub lowest_empty_block: i32,
}

impl ChunkBounds {
    /// The whole chunk.
    pub const fn full() -> Self {
        Self {
            min_x: 0,
            max_x: CHUNK_EDGE,
            min_y: 0,
            max_y: CHUNK_EDGE,
            min_z: 0,
            max_z: CHUNK_EDGE,
            lowest_empty_block: 0,
        }
    }
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self::full()
    }
}

/// Fills a fresh chunk store with terrain. Runs on a work thread.
pub trait TerrainGenerator: Send + Sync {
    fn generate_terrain(&self, chunk_pos: IVec3, blocks: &mut ChunkBlocks);
}

/// Builds render geometry for a chunk. Runs on a work thread.
pub trait GeometryBuilder: Send + Sync {
    fn build_geometry(&self, chunk_pos: IVec3, blocks: &ChunkBlocks, bounds: ChunkBounds);
}

/// Builds a physics collider for a chunk. Runs on a work thread.
pub trait ColliderBuilder: Send + Sync {
    fn build_collider(&self, chunk_pos: IVec3, blocks: &ChunkBlocks, bounds: ChunkBounds);
}

/// Everything a [`World`](crate::World) needs from the outside.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<BlockRegistry>,
    pub terrain: Arc<dyn TerrainGenerator>,
    pub geometry: Arc<dyn GeometryBuilder>,
    pub collider: Arc<dyn ColliderBuilder>,
    /// `None` disables persistence regardless of configuration.
    pub storage: Option<Arc<dyn ChunkStorage>>,
    pub broadcaster: Option<Arc<dyn EditBroadcaster>>,
}

impl Collaborators {
    /// Flat terrain and no-op builders; no storage, no broadcast.
    pub fn headless(registry: Arc<BlockRegistry>, terrain: Arc<dyn TerrainGenerator>) -> Self {
        let builds = Arc::new(BuildCounter::default());
        Self {
            registry,
            terrain,
            geometry: builds.clone(),
            collider: builds,
            storage: None,
            broadcaster: None,
        }
    }
}

/// Fills every cell below `height` (in global Y) with `block`.
#[derive(Clone, Copy, Debug)]
pub struct FlatTerrain {
    pub height: i32,
    pub block: BlockData,
}

impl TerrainGenerator for FlatTerrain {
    fn generate_terrain(&self, chunk_pos: IVec3, blocks: &mut ChunkBlocks) {
        let top = (self.height - chunk_pos.y).min(CHUNK_SIZE) - 1;
        if top < 0 {
            return;
        }
        blocks.set_range(IVec3::ZERO, IVec3::new(CHUNK_EDGE, top, CHUNK_EDGE), self.block);
    }
}

/// Counts builds; stands in for renderer and physics in headless runs.
#[derive(Debug, Default)]
pub struct BuildCounter {
    geometry: AtomicUsize,
    collider: AtomicUsize,
}

impl BuildCounter {
    pub fn geometry_builds(&self) -> usize {
        self.geometry.load(Ordering::Relaxed)
    }

    pub fn collider_builds(&self) -> usize {
        self.collider.load(Ordering::Relaxed)
    }
}

impl GeometryBuilder for BuildCounter {
    fn build_geometry(&self, chunk_pos: IVec3, _blocks: &ChunkBlocks, _bounds: ChunkBounds) {
        tracing::trace!(chunk = ?chunk_pos, "geometry built");
        self.geometry.fetch_add(1, Ordering::Relaxed);
    }
}

impl ColliderBuilder for BuildCounter {
    fn build_collider(&self, chunk_pos: IVec3, _blocks: &ChunkBlocks, _bounds: ChunkBounds) {
        tracing::trace!(chunk = ?chunk_pos, "collider built");
        self.collider.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
