//! Stage execution for one chunk.
//!
//! Every stage has a request half that runs on the coordinator (checks,
//! bit bookkeeping, job submission) and a done half that runs when the
//! coordinator drains the job's completion. Done halves only touch the
//! chunk they belong to.

use std::sync::Arc;

use cubeworks_config::FeatureConfig;
use cubeworks_voxel::{CHUNK_SIZE, ChunkBlocks, Face, PADDED_AREA, padded_index};
use glam::IVec3;
use parking_lot::Mutex;

use crate::budget::TimeBudget;
use crate::chunk::{Chunk, SharedSave};
use crate::collaborators::{ChunkBounds, Collaborators};
use crate::persistence::StorageError;
use crate::pool::{PRIORITY_NORMAL, PoolKind, Pools};
use crate::stage::{ChunkState, Stage};
use crate::state::StageStep;
use crate::world_chunks::NeighborView;

/// Everything a stage may use besides its own chunk.
pub(crate) struct StageContext<'a> {
    pub features: &'a FeatureConfig,
    pub collab: &'a Collaborators,
    pub pools: &'a Pools,
    pub budget: &'a mut TimeBudget,
    pub neighbors: &'a NeighborView,
    pub now_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StageFlow {
    /// Try the next stage this tick.
    Continue,
    /// Stop for this tick.
    Stop,
}

impl Chunk {
    /// Runs the driver loop once.
    pub(crate) fn update_state(&mut self, ctx: &mut StageContext<'_>) {
        if self.state.in_flight().is_some() {
            return;
        }
        if self.state.removal_requested() && !self.state.is_completed(Stage::LoadData) {
            self.state.complete(Stage::Remove);
            return;
        }

        for stage in Stage::ALL {
            self.state.process_notify_state();
            match self.state.step(stage, ctx.neighbors.generated) {
                StageStep::NotPending | StageStep::Skip => {}
                StageStep::Wait => return,
                StageStep::Ready => {
                    if self.run_stage(stage, ctx) == StageFlow::Stop {
                        return;
                    }
                }
            }
        }
        self.state.process_notify_state();
    }

    fn run_stage(&mut self, stage: Stage, ctx: &mut StageContext<'_>) -> StageFlow {
        match stage {
            Stage::LoadData => self.request_load_data(ctx),
            Stage::PrepareGenerate => self.request_prepare_generate(ctx),
            Stage::Generate => self.request_generate(ctx),
            Stage::CalculateBounds => self.request_calculate_bounds(),
            Stage::PrepareSaveData => self.request_prepare_save_data(ctx),
            Stage::SaveData => self.request_save_data(ctx),
            Stage::Remove => self.request_remove(),
            Stage::BuildCollider => self.request_build_collider(ctx),
            Stage::BuildVertices => self.request_build_vertices(ctx),
        }
    }

    /// Completion of this chunk's background job.
    pub(crate) fn on_task_done(&mut self, stage: Stage, success: bool) {
        let running = self.state.end_task();
        debug_assert_eq!(running, Some(stage));
        tracing::trace!(chunk = ?self.pos, ?stage, success, "stage job finished");
        match stage {
            Stage::LoadData => self.on_load_data_done(success),
            Stage::PrepareGenerate => self.on_prepare_generate_done(success),
            Stage::Generate => self.on_generate_done(),
            Stage::PrepareSaveData => self.on_prepare_save_data_done(success),
            Stage::SaveData => self.on_save_data_done(success),
            Stage::BuildCollider | Stage::BuildVertices => self.state.complete(stage),
            Stage::CalculateBounds | Stage::Remove => {}
        }
    }

    /// A snapshot received over the network replaces load and generation.
    pub(crate) fn on_network_snapshot(&mut self) {
        for stage in [Stage::LoadData, Stage::PrepareGenerate, Stage::Generate] {
            self.state.begin_stage(stage);
            self.state.complete(stage);
        }
        self.state.set_next(ChunkState::BuildVertices);
    }

    fn submit<F>(
        &mut self,
        ctx: &StageContext<'_>,
        pool: PoolKind,
        stage: Stage,
        priority: u64,
        job: F,
    )
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        tracing::trace!(chunk = ?self.pos, ?stage, ?pool, "stage job submitted");
        self.state.begin_task(stage);
        ctx.pools.submit(pool, self.id, stage, priority, job);
    }

    fn serialization_save(&self, ctx: &StageContext<'_>) -> Option<SharedSave> {
        if !ctx.features.use_serialization {
            return None;
        }
        self.save.clone()
    }

    // --- load ---

    fn request_load_data(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        self.state.begin_stage(Stage::LoadData);

        let storage = ctx
            .collab
            .storage
            .as_ref()
            .filter(|_| ctx.features.use_serialization);
        let Some(storage) = storage else {
            self.on_load_data_done(false);
            return StageFlow::Continue;
        };

        let handle = storage.open(self.pos, ctx.features.use_differential_serialization);
        let save: SharedSave = Arc::new(Mutex::new(handle));
        self.save = Some(save.clone());
        let pos = self.pos;
        self.submit(ctx, PoolKind::Io, Stage::LoadData, PRIORITY_NORMAL, move || {
            storage_outcome(pos, Stage::LoadData, save.lock().read())
        });
        StageFlow::Stop
    }

    fn on_load_data_done(&mut self, success: bool) {
        self.state.complete(Stage::LoadData);
        if success {
            self.state.set_next(ChunkState::PrepareGenerate);
        } else {
            self.state.complete(Stage::PrepareGenerate);
            self.state.set_next(ChunkState::Generate);
        }
    }

    fn request_prepare_generate(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        self.state.begin_stage(Stage::PrepareGenerate);

        let Some(save) = self.serialization_save(ctx) else {
            self.on_prepare_generate_done(false);
            return StageFlow::Continue;
        };
        let blocks = Arc::clone(&self.blocks);
        let pos = self.pos;
        self.submit(ctx, PoolKind::Io, Stage::PrepareGenerate, PRIORITY_NORMAL, move || {
            let mut save = save.lock();
            let mut blocks = blocks.write();
            storage_outcome(pos, Stage::PrepareGenerate, save.do_decompression(&mut blocks))
        });
        StageFlow::Stop
    }

    fn on_prepare_generate_done(&mut self, success: bool) {
        self.state.complete(Stage::PrepareGenerate);
        if !success {
            self.state.set_next(ChunkState::Generate);
            return;
        }

        self.blocks.write().set_bounds_recalculation(false);
        let differential = self
            .save
            .as_ref()
            .is_some_and(|save| save.lock().is_differential());
        self.state.complete(Stage::CalculateBounds);
        if differential {
            // the stored cells are applied on top of regenerated terrain
            self.state.set_next(ChunkState::Generate);
        } else {
            self.state.complete(Stage::Generate);
            self.state.set_next(ChunkState::BuildVertices);
        }
    }

    // --- generate ---

    fn request_generate(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        self.state.begin_stage(Stage::Generate);

        let blocks = Arc::clone(&self.blocks);
        let terrain = Arc::clone(&ctx.collab.terrain);
        let save = self.serialization_save(ctx);
        let pos = self.pos;
        self.submit(ctx, PoolKind::Work, Stage::Generate, PRIORITY_NORMAL, move || {
            let mut blocks = blocks.write();
            terrain.generate_terrain(pos, &mut blocks);
            if let Some(save) = save {
                save.lock().commit_changes(&mut blocks);
            }
            blocks.invalidate_count();
            blocks.recalculate_empty_blocks();
            true
        });
        StageFlow::Stop
    }

    fn on_generate_done(&mut self) {
        self.state.complete(Stage::Generate);
        self.state.set_next(ChunkState::BuildVertices);
    }

    fn request_calculate_bounds(&mut self) -> StageFlow {
        self.state.begin_stage(Stage::CalculateBounds);
        self.bounds = ChunkBounds::full();
        self.blocks.write().set_bounds_recalculation(false);
        self.state.complete(Stage::CalculateBounds);
        self.state.set_next(ChunkState::Idle);
        StageFlow::Continue
    }

    // --- save ---

    fn request_prepare_save_data(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        self.state.begin_stage(Stage::PrepareSaveData);

        let Some(save) = self.serialization_save(ctx) else {
            self.on_prepare_save_data_done(false);
            return StageFlow::Continue;
        };
        save.lock().consume_changes(&self.blocks.read());
        let pos = self.pos;
        self.submit(ctx, PoolKind::Io, Stage::PrepareSaveData, PRIORITY_NORMAL, move || {
            storage_outcome(pos, Stage::PrepareSaveData, save.lock().do_compression())
        });
        StageFlow::Stop
    }

    fn on_prepare_save_data_done(&mut self, success: bool) {
        self.state.complete(Stage::PrepareSaveData);
        if success {
            self.state.set_next(ChunkState::SaveData);
            return;
        }
        if let Some(save) = &self.save {
            save.lock().mark_as_processed();
        }
        self.state.complete(Stage::SaveData);
        self.state.set_save_needed(false);
    }

    fn request_save_data(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        self.state.begin_stage(Stage::SaveData);

        let Some(save) = self.serialization_save(ctx) else {
            self.on_save_data_done(false);
            return StageFlow::Continue;
        };
        let pos = self.pos;
        self.submit(ctx, PoolKind::Io, Stage::SaveData, PRIORITY_NORMAL, move || {
            storage_outcome(pos, Stage::SaveData, save.lock().write())
        });
        StageFlow::Stop
    }

    fn on_save_data_done(&mut self, success: bool) {
        if success {
            self.state.set_external(crate::stage::ChunkStateExternal::Saved);
        } else if let Some(save) = &self.save {
            save.lock().mark_as_processed();
        }
        self.state.complete(Stage::SaveData);
        self.state.set_save_needed(false);
    }

    // --- remove ---

    fn request_remove(&mut self) -> StageFlow {
        self.state.begin_stage(Stage::Remove);
        self.state.complete(Stage::Remove);
        StageFlow::Stop
    }

    // --- builds ---

    fn request_build_collider(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        if !self.synchronize_chunk(ctx) {
            return StageFlow::Stop;
        }
        self.state.begin_stage(Stage::BuildCollider);

        if !has_blocks(&self.blocks.read()) {
            self.state.complete(Stage::BuildCollider);
            return StageFlow::Continue;
        }
        let blocks = Arc::clone(&self.blocks);
        let collider = Arc::clone(&ctx.collab.collider);
        let (pos, bounds) = (self.pos, self.bounds);
        self.submit(ctx, PoolKind::Work, Stage::BuildCollider, PRIORITY_NORMAL, move || {
            collider.build_collider(pos, &blocks.read(), bounds);
            true
        });
        StageFlow::Stop
    }

    fn request_build_vertices(&mut self, ctx: &mut StageContext<'_>) -> StageFlow {
        if !self.synchronize_chunk(ctx) {
            return StageFlow::Stop;
        }
        let priority = if self.state.build_now() {
            ctx.now_ms
        } else {
            PRIORITY_NORMAL
        };
        self.state.begin_stage(Stage::BuildVertices);

        if !has_blocks(&self.blocks.read()) {
            self.state.complete(Stage::BuildVertices);
            return StageFlow::Continue;
        }
        let blocks = Arc::clone(&self.blocks);
        let geometry = Arc::clone(&ctx.collab.geometry);
        let (pos, bounds) = (self.pos, self.bounds);
        self.submit(ctx, PoolKind::Work, Stage::BuildVertices, priority, move || {
            geometry.build_geometry(pos, &blocks.read(), bounds);
            true
        });
        StageFlow::Stop
    }

    /// Neighbor precondition shared by both builds. `false` defers the build.
    fn synchronize_chunk(&mut self, ctx: &mut StageContext<'_>) -> bool {
        if self.state.listener_count() != Face::ALL.len() || !ctx.neighbors.generated {
            return false;
        }

        if self.state.needs_edge_sync() {
            if !ctx.budget.has_time_budget() {
                return false;
            }
            self.state.mark_edges_synced();
            ctx.budget.start_measurement();
            self.synchronize_edges(ctx.neighbors);
            ctx.budget.stop_measurement();
        }

        let blocks = self.blocks.read();
        if blocks.needs_bounds_recalculation() && has_blocks(&blocks) {
            drop(blocks);
            self.state.request_state(ChunkState::CalculateBounds);
            return false;
        }
        true
    }

    /// Copies every neighbor's bordering layer into this chunk's padding.
    fn synchronize_edges(&self, neighbors: &NeighborView) {
        let mut blocks = self.blocks.write();
        for face in Face::ALL {
            let Some(neighbor) = &neighbors.blocks[face.index()] else {
                continue;
            };
            copy_edge(&mut blocks, &neighbor.read(), face);
        }
        tracing::trace!(chunk = ?self.pos, "edges synchronized");
    }
}

fn has_blocks(blocks: &ChunkBlocks) -> bool {
    blocks.non_empty_blocks().is_some_and(|count| count > 0)
}

/// Fills `dst`'s padding layer towards `face` from the neighbor `src`.
fn copy_edge(dst: &mut ChunkBlocks, src: &ChunkBlocks, face: Face) {
    let dst_layer = face.padding_coord();
    let src_layer = face.opposite().boundary_coord();

    if face.axis() == 1 {
        let dst_index = padded_index(IVec3::new(-1, dst_layer, -1));
        let src_index = padded_index(IVec3::new(-1, src_layer, -1));
        dst.copy_from(src, src_index, dst_index, PADDED_AREA);
        return;
    }

    for y in -1..=CHUNK_SIZE {
        for w in -1..=CHUNK_SIZE {
            let (to, from) = if face.axis() == 0 {
                (IVec3::new(dst_layer, y, w), IVec3::new(src_layer, y, w))
            } else {
                (IVec3::new(w, y, dst_layer), IVec3::new(w, y, src_layer))
            };
            dst.set_raw(padded_index(to), src.get(padded_index(from)));
        }
    }
}

fn storage_outcome(chunk: IVec3, stage: Stage, result: Result<(), StorageError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err @ (StorageError::NotFound(_) | StorageError::NothingToWrite(_))) => {
            tracing::debug!(chunk = ?chunk, ?stage, reason = %err, "persistence step skipped");
            false
        }
        Err(err) => {
            tracing::warn!(chunk = ?chunk, ?stage, error = %err, "persistence step failed");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
