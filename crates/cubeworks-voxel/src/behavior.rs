//! Per-type block hooks run while edits are applied and on random updates.
//!
//! Hooks never mutate the store directly. Edits they request through
//! [`BlockHookContext`] are queued and applied on the following tick.

use glam::IVec3;

use crate::block_data::BlockData;
use crate::coords::is_inner_coord;

/// An edit requested by a hook, in the hooked chunk's local coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FollowUpEdit {
    pub local: IVec3,
    pub block: BlockData,
}

/// What a hook sees of the cell it runs for.
pub struct BlockHookContext<'a> {
    chunk_pos: IVec3,
    local: IVec3,
    block: BlockData,
    follow_ups: &'a mut Vec<FollowUpEdit>,
}

impl<'a> BlockHookContext<'a> {
    pub(crate) fn new(
        chunk_pos: IVec3,
        local: IVec3,
        block: BlockData,
        follow_ups: &'a mut Vec<FollowUpEdit>,
    ) -> Self {
        Self {
            chunk_pos,
            local,
            block,
            follow_ups,
        }
    }

    pub fn chunk_pos(&self) -> IVec3 {
        self.chunk_pos
    }

    pub fn local_pos(&self) -> IVec3 {
        self.local
    }

    pub fn global_pos(&self) -> IVec3 {
        self.chunk_pos + self.local
    }

    /// The cell the hook runs for (the old value for `on_destroy`).
    pub fn block(&self) -> BlockData {
        self.block
    }

    /// Queues an edit of another cell in the same chunk for the next tick.
    ///
    /// Returns `false` if `local` is not an inner cell of this chunk.
    pub fn queue_edit(&mut self, local: IVec3, block: BlockData) -> bool {
        if !is_inner_coord(local) {
            tracing::warn!(chunk = ?self.chunk_pos, ?local, "hook edit outside chunk ignored");
            return false;
        }
        self.follow_ups.push(FollowUpEdit { local, block });
        true
    }

    /// Queues replacing the hooked cell itself.
    pub fn replace_self(&mut self, block: BlockData) {
        let local = self.local;
        self.follow_ups.push(FollowUpEdit { local, block });
    }
}

/// Hooks attached to a block type in the registry.
pub trait BlockBehavior: Send + Sync {
    /// A cell of this type was written.
    fn on_create(&self, _ctx: &mut BlockHookContext<'_>) {}

    /// A cell of this type is about to be overwritten.
    fn on_destroy(&self, _ctx: &mut BlockHookContext<'_>) {}

    /// The cell was picked by a random block update.
    fn on_random_update(&self, _ctx: &mut BlockHookContext<'_>) {}
}

/// Grows into another block type on each random update.
///
/// Chaining several growing types yields a multi-stage plant.
#[derive(Clone, Copy, Debug)]
pub struct GrowingBlock {
    grows_into: BlockData,
}

impl GrowingBlock {
    pub fn new(grows_into: BlockData) -> Self {
        Self { grows_into }
    }
}

impl BlockBehavior for GrowingBlock {
    fn on_random_update(&self, ctx: &mut BlockHookContext<'_>) {
        ctx.replace_self(self.grows_into.with_rotation(ctx.block().rotation()));
    }
}
