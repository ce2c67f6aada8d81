//! A chunk instance: position, block store, state machine and bounds.

use std::fmt;
use std::sync::Arc;

use cubeworks_voxel::ChunkBlocks;
use glam::IVec3;
use parking_lot::{Mutex, RwLock};

use crate::collaborators::ChunkBounds;
use crate::persistence::ChunkSave;
use crate::state::ChunkStateMachine;

/// Stable handle of a chunk instance. Never reused within one world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Block store shared between the coordinator and the chunk's own job.
pub type SharedBlocks = Arc<RwLock<ChunkBlocks>>;

pub(crate) type SharedSave = Arc<Mutex<Box<dyn ChunkSave>>>;

pub struct Chunk {
    pub(crate) id: ChunkId,
    pub(crate) pos: IVec3,
    pub(crate) blocks: SharedBlocks,
    pub(crate) state: ChunkStateMachine,
    pub(crate) bounds: ChunkBounds,
    pub(crate) needs_collider: bool,
    pub(crate) save: Option<SharedSave>,
}

impl Chunk {
    /// `pos` is in cells and must be a multiple of the chunk size.
    pub fn new(id: ChunkId, pos: IVec3) -> Self {
        Self {
            id,
            pos,
            blocks: Arc::new(RwLock::new(ChunkBlocks::new())),
            state: ChunkStateMachine::new(),
            bounds: ChunkBounds::full(),
            needs_collider: false,
            save: None,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn pos(&self) -> IVec3 {
        self.pos
    }

    pub fn blocks(&self) -> &SharedBlocks {
        &self.blocks
    }

    pub fn state(&self) -> &ChunkStateMachine {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ChunkStateMachine {
        &mut self.state
    }

    pub fn bounds(&self) -> ChunkBounds {
        self.bounds
    }

    pub fn needs_collider(&self) -> bool {
        self.needs_collider
    }

    /// Turning colliders on queues a collider build through the rebuild mask.
    pub fn set_needs_collider(&mut self, needs_collider: bool) {
        if needs_collider && !self.needs_collider {
            self.blocks.write().request_collider();
        }
        self.needs_collider = needs_collider;
    }

    /// Clears blocks, state and persistence. Neighbor links must already be
    /// torn down.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.state.listener_count(), 0);
        self.blocks.write().reset();
        self.state.reset();
        self.bounds = ChunkBounds::full();
        self.needs_collider = false;
        self.save = None;
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("pos", &self.pos)
            .field("state", &format_args!("{}", self.state))
            .finish()
    }
}
