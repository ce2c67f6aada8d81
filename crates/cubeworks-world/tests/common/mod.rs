#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cubeworks_config::Config;
use cubeworks_voxel::{BlockData, BlockRegistry, BlockTypeDef, ChunkBlocks};
use cubeworks_world::{
    BuildCounter, ChunkStorage, Collaborators, EditBroadcaster, FlatTerrain, TerrainGenerator,
    World,
};
use glam::IVec3;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Small world, fast throttles, persistence off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.world.min_chunk = [-2, -2, -2];
    config.world.max_chunk = [2, 2, 2];
    config.pipeline.io_threads = 1;
    config.pipeline.work_threads = 2;
    config.pipeline.geometry_throttle_ms = 0;
    config.pipeline.collider_throttle_ms = 0;
    config.pipeline.edge_sync_budget_us = 1_000_000;
    config.features.use_serialization = false;
    config
}

pub fn registry() -> (Arc<BlockRegistry>, BlockData) {
    let mut registry = BlockRegistry::new();
    let stone = registry.register(BlockTypeDef::solid("stone")).unwrap();
    let block = registry.block(stone);
    (Arc::new(registry), block)
}

/// Counts generator calls on top of flat terrain.
pub struct CountingTerrain {
    pub flat: FlatTerrain,
    pub calls: AtomicUsize,
}

impl CountingTerrain {
    pub fn new(height: i32, block: BlockData) -> Arc<Self> {
        Arc::new(Self {
            flat: FlatTerrain { height, block },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TerrainGenerator for CountingTerrain {
    fn generate_terrain(&self, chunk_pos: IVec3, blocks: &mut ChunkBlocks) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.flat.generate_terrain(chunk_pos, blocks);
    }
}

pub struct Harness {
    pub world: World,
    pub builds: Arc<BuildCounter>,
    pub terrain: Arc<CountingTerrain>,
    pub stone: BlockData,
}

pub fn harness(
    config: Config,
    height: i32,
    storage: Option<Arc<dyn ChunkStorage>>,
    broadcaster: Option<Arc<dyn EditBroadcaster>>,
) -> Harness {
    let (registry, stone) = registry();
    let builds = Arc::new(BuildCounter::default());
    let terrain = CountingTerrain::new(height, stone);
    let collab = Collaborators {
        registry,
        terrain: terrain.clone(),
        geometry: builds.clone(),
        collider: builds.clone(),
        storage,
        broadcaster,
    };
    Harness {
        world: World::new(config, collab),
        builds,
        terrain,
        stone,
    }
}

/// Every chunk position of the 3x3x3 cube around the origin chunk.
pub fn cube_around_origin() -> Vec<IVec3> {
    let mut positions = Vec::new();
    for y in -1..=1 {
        for z in -1..=1 {
            for x in -1..=1 {
                positions.push(IVec3::new(x, y, z) * 16);
            }
        }
    }
    positions
}
