//! Chunk lifecycle for a voxel world: per-chunk stage state machines, IO and
//! compute worker pools, persistence and the world coordinator that ties
//! them together each tick.

pub mod budget;
pub mod chunk;
pub mod collaborators;
pub mod net;
pub mod persistence;
mod pipeline;
pub mod pool;
pub mod stage;
pub mod state;
pub mod world;
pub mod world_blocks;
pub mod world_chunks;

pub use budget::TimeBudget;
pub use chunk::{Chunk, ChunkId, SharedBlocks};
pub use collaborators::{
    BuildCounter, ChunkBounds, ColliderBuilder, Collaborators, FlatTerrain, GeometryBuilder,
    TerrainGenerator,
};
pub use net::{BlockEditMessage, ChannelBroadcaster, ClientId, EditBroadcaster, NetError, fragment_snapshot};
pub use persistence::{
    ChunkSave, ChunkStorage, FileStorage, MemoryStorage, PayloadStore, SaveHandle, StorageError,
};
pub use pool::{PRIORITY_NORMAL, PoolKind, Pools, TaskCompletion, WorkerPool};
pub use stage::{ChunkState, ChunkStateExternal, Stage, StageProgress, StageSet};
pub use state::{ChunkStateMachine, NextAction, SafeStateView, StageStep};
pub use world::{World, WorldError, WorldEvent};
pub use world_blocks::WorldBlocks;
pub use world_chunks::{CreateOutcome, WorldChunks};
