//! Headless driver for the chunk pipeline.
//!
//! Loads `config.ron` (CLI flags override it), streams in the chunks around
//! the origin, edits the surface, saves the modified chunks and exits.
//! Run with `cargo run -p cubeworks-app -- --ticks 300 --world sandbox`.

mod terrain;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cubeworks_config::{CliArgs, Config};
use cubeworks_voxel::{BlockData, BlockRegistry, BlockTypeDef, GrowingBlock, RegistryError};
use cubeworks_world::{
    BuildCounter, ChunkStorage, Collaborators, FileStorage, Stage, World, WorldEvent,
};
use glam::IVec3;
use tracing::info;

use crate::terrain::{NoiseTerrain, TerrainBlocks, TerrainParams};

/// Chunks streamed in around the origin, per horizontal axis.
const VIEW_RADIUS: i32 = 2;

const FRAME: Duration = Duration::from_millis(16);

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cubeworks")
    });

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    cubeworks_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let (registry, blocks, sapling) = match build_registry() {
        Ok(registry) => registry,
        Err(err) => {
            tracing::error!(error = %err, "block registry setup failed");
            std::process::exit(1);
        }
    };

    let terrain = Arc::new(NoiseTerrain::new(
        config.world.seed,
        TerrainParams::default(),
        blocks,
    ));
    let builds = Arc::new(BuildCounter::default());
    let storage: Option<Arc<dyn ChunkStorage>> = config
        .features
        .use_serialization
        .then(|| Arc::new(FileStorage::new(config.world.world_dir())) as Arc<dyn ChunkStorage>);
    let collab = Collaborators {
        registry: Arc::new(registry),
        terrain: terrain.clone(),
        geometry: builds.clone(),
        collider: builds.clone(),
        storage,
        broadcaster: None,
    };

    info!(
        world = %config.world.world_dir().display(),
        seed = config.world.seed,
        "Starting chunk pipeline"
    );
    let mut world = World::new(config, collab);
    run(&mut world, args.ticks, &terrain, sapling);

    info!(
        chunks = world.chunks().len(),
        geometry_builds = builds.geometry_builds(),
        collider_builds = builds.collider_builds(),
        ticks = world.ticks(),
        "Finished"
    );
}

fn build_registry() -> Result<(BlockRegistry, TerrainBlocks, BlockData), RegistryError> {
    let mut registry = BlockRegistry::new();
    let stone = registry.register(BlockTypeDef::solid("stone"))?;
    let dirt = registry.register(BlockTypeDef::solid("dirt"))?;
    let grass = registry.register(BlockTypeDef::solid("grass"))?;
    let bush = registry.register(BlockTypeDef::decoration("bush"))?;
    let bush = registry.block(bush);
    let sapling = registry.register_with_behavior(
        BlockTypeDef::decoration("sapling"),
        Arc::new(GrowingBlock::new(bush)),
    )?;

    let blocks = TerrainBlocks {
        stone: registry.block(stone),
        dirt: registry.block(dirt),
        grass: registry.block(grass),
    };
    let sapling = registry.block(sapling);
    Ok((registry, blocks, sapling))
}

fn run(world: &mut World, max_ticks: u32, terrain: &NoiseTerrain, sapling: BlockData) {
    let mut created = 0;
    for y in -1..=1 {
        for z in -VIEW_RADIUS..=VIEW_RADIUS {
            for x in -VIEW_RADIUS..=VIEW_RADIUS {
                if world.create_chunk(IVec3::new(x, y, z) * 16).was_created() {
                    created += 1;
                }
            }
        }
    }
    world.set_needs_collider(IVec3::ZERO, true);
    info!(created, "Chunks requested");

    let center_built = tick_up_to(world, max_ticks, |world| {
        world.chunk(IVec3::ZERO).is_some_and(|chunk| {
            chunk.state().is_completed(Stage::BuildVertices)
                && chunk.state().is_completed(Stage::BuildCollider)
        })
    });
    if !center_built {
        tracing::warn!(ticks = world.ticks(), "center chunk not built in time");
        return;
    }
    info!(ticks = world.ticks(), "Center chunk built");

    // plant a sapling on the surface of a column inside the center chunk
    let (x, z) = (7, 7);
    let surface = IVec3::new(x, terrain.height_at(x, z), z);
    if world.blocks().modify(surface, sapling, true) {
        info!(cell = ?surface, "Planted sapling");
    } else {
        tracing::warn!(cell = ?surface, "surface is outside the loaded chunks");
    }

    for _ in 0..10 {
        world.tick();
    }

    let saves = world.save_all();
    info!(saves, "Saving modified chunks");
    let mut saved = 0;
    tick_up_to(world, max_ticks, |world| {
        saved = world
            .events()
            .iter()
            .filter(|e| matches!(e, WorldEvent::Saved(_)))
            .count();
        saved >= saves
    });
    info!(saved, "Chunks saved");
}

/// Ticks once per frame until `done` holds, giving up after `max_ticks`.
fn tick_up_to(world: &mut World, max_ticks: u32, mut done: impl FnMut(&World) -> bool) -> bool {
    for _ in 0..max_ticks {
        world.tick();
        if done(world) {
            return true;
        }
        std::thread::sleep(FRAME);
    }
    false
}
