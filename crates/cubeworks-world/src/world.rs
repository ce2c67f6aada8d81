//! The coordinating side of the chunk pipeline.
//!
//! [`World::tick`] runs once per frame on one thread. It drains finished
//! jobs, applies queued block edits, releases throttled rebuilds and then
//! lets every chunk advance its stages.

use std::time::{Duration, Instant};

use cubeworks_config::Config;
use cubeworks_voxel::{
    BlockData, CHUNK_SIZE, ChangedCell, EditSource, Face, RebuildThrottle, ReceiveError, ReceiveProgress,
    local_of,
};
use glam::IVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::budget::TimeBudget;
use crate::chunk::{Chunk, ChunkId};
use crate::collaborators::Collaborators;
use crate::net::{BlockEditMessage, ClientId};
use crate::pipeline::StageContext;
use crate::pool::Pools;
use crate::stage::{ChunkState, ChunkStateExternal, Stage};
use crate::world_blocks::WorldBlocks;
use crate::world_chunks::{CreateOutcome, WorldChunks};

/// Notifications collected during ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorldEvent {
    /// A chunk finished writing its save.
    Saved(IVec3),
    /// A chunk was removed from the world.
    Removed(IVec3),
}

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The position lies outside the configured world limits.
    #[error("chunk position {0} is outside the world")]
    OutOfBounds(IVec3),
    /// A snapshot fragment was rejected.
    #[error(transparent)]
    Receive(#[from] ReceiveError),
}

pub struct World {
    config: Config,
    collab: Collaborators,
    chunks: WorldChunks,
    pools: Pools,
    budget: TimeBudget,
    throttle: RebuildThrottle,
    rng: StdRng,
    started: Instant,
    /// Padding writes owed to chunks whose store was locked by a job.
    deferred_edges: FxHashMap<ChunkId, Vec<(usize, BlockData)>>,
    events: Vec<WorldEvent>,
    ticks: u64,
}

impl World {
    pub fn new(config: Config, collab: Collaborators) -> Self {
        let io_threads = config.pipeline.resolved_io_threads();
        let work_threads = config.pipeline.resolved_work_threads();
        tracing::info!(
            io_threads,
            work_threads,
            serialization = config.features.use_serialization,
            differential = config.features.use_differential_serialization,
            role = ?config.network.role,
            "world created"
        );

        Self {
            chunks: WorldChunks::from_config(&config.world),
            pools: Pools::new(io_threads, work_threads),
            budget: TimeBudget::new(Duration::from_micros(config.pipeline.edge_sync_budget_us)),
            throttle: RebuildThrottle {
                geometry_ms: config.pipeline.geometry_throttle_ms,
                collider_ms: config.pipeline.collider_throttle_ms,
            },
            rng: StdRng::seed_from_u64(config.world.seed),
            started: Instant::now(),
            deferred_edges: FxHashMap::default(),
            events: Vec::new(),
            ticks: 0,
            config,
            collab,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chunks(&self) -> &WorldChunks {
        &self.chunks
    }

    pub fn chunk(&self, pos: IVec3) -> Option<&Chunk> {
        self.chunks.get(pos)
    }

    pub fn blocks(&self) -> WorldBlocks<'_> {
        WorldBlocks::new(&self.chunks, &self.collab.registry)
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Jobs submitted and not yet drained.
    pub fn in_flight_count(&self) -> usize {
        self.pools.in_flight_count()
    }

    /// Events collected since the last [`World::drain_events`].
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.events)
    }

    // --- chunk lifecycle ---

    /// Creates the chunk containing `pos` and starts loading it. Existing
    /// chunks are left alone.
    pub fn create_chunk(&mut self, pos: IVec3) -> CreateOutcome {
        let outcome = self.chunks.create_or_get(pos);
        if let CreateOutcome::Created(id) = outcome
            && let Some(chunk) = self.chunks.get_by_id_mut(id)
        {
            chunk.state.set_possibly_visible(true);
            chunk.state.set_visible(true);
            chunk.state.request_state(ChunkState::LoadData);
        }
        outcome
    }

    pub fn set_chunk_visibility(
        &mut self,
        pos: IVec3,
        visible: bool,
        possibly_visible: bool,
    ) -> bool {
        let Some(chunk) = self.chunks.get_mut(pos) else {
            return false;
        };
        chunk.state.set_visible(visible);
        chunk.state.set_possibly_visible(possibly_visible);
        true
    }

    pub fn set_needs_collider(&mut self, pos: IVec3, needs_collider: bool) -> bool {
        let Some(chunk) = self.chunks.get_mut(pos) else {
            return false;
        };
        chunk.set_needs_collider(needs_collider);
        true
    }

    pub fn request_state(&mut self, pos: IVec3, state: ChunkState) -> bool {
        let Some(chunk) = self.chunks.get_mut(pos) else {
            return false;
        };
        chunk.state.request_state(state);
        true
    }

    /// Saves the chunk at `pos`. A coming removal waits for the save.
    pub fn request_save(&mut self, pos: IVec3) -> bool {
        let Some(chunk) = self.chunks.get_mut(pos) else {
            return false;
        };
        chunk.state.set_save_needed(true);
        chunk.state.request_state(ChunkState::PrepareSaveData);
        true
    }

    /// Requests a save of every generated chunk holding modified cells.
    /// Returns how many saves were requested.
    pub fn save_all(&mut self) -> usize {
        let modified: Vec<IVec3> = self
            .chunks
            .iter()
            .filter(|chunk| chunk.state.is_completed(Stage::Generate))
            .filter(|chunk| chunk.blocks.read().has_modifications())
            .map(Chunk::pos)
            .collect();
        for &pos in &modified {
            self.request_save(pos);
        }
        tracing::debug!(chunks = modified.len(), "save requested for modified chunks");
        modified.len()
    }

    /// Requests removal. Chunks with unsaved modifications are saved first.
    pub fn request_remove(&mut self, pos: IVec3) -> bool {
        let save_first = self.config.features.use_serialization
            && self
                .chunks
                .get(pos)
                .is_some_and(|chunk| chunk.blocks.read().has_modifications());
        if save_first {
            self.request_save(pos);
        }
        self.request_state(pos, ChunkState::Remove)
    }

    // --- network ---

    /// Feeds one snapshot fragment for the chunk at `pos`, creating the chunk
    /// when it is not loaded yet.
    pub fn receive_chunk_fragment(
        &mut self,
        pos: IVec3,
        fragment: &[u8],
    ) -> Result<ReceiveProgress, WorldError> {
        let id = match self.chunks.create_or_get(pos) {
            CreateOutcome::Created(id) | CreateOutcome::Existing(id) => id,
            CreateOutcome::OutOfBounds => return Err(WorldError::OutOfBounds(pos)),
        };
        let header_size = self.config.network.header_size;
        let Some(chunk) = self.chunks.get_by_id_mut(id) else {
            return Err(WorldError::OutOfBounds(pos));
        };
        chunk.state.set_possibly_visible(true);
        chunk.state.set_visible(true);

        let progress = chunk.blocks.write().receive_fragment(fragment, header_size)?;
        match progress {
            ReceiveProgress::Pending => {}
            ReceiveProgress::Complete => {
                tracing::debug!(chunk = ?chunk.pos, "chunk snapshot received");
                chunk.on_network_snapshot();
            }
            ReceiveProgress::Reset => chunk.state.request_state(ChunkState::LoadData),
        }
        Ok(progress)
    }

    /// Queues an edit that arrived from a peer. It is applied next tick and
    /// relayed according to the network role, never back to `origin`.
    pub fn apply_remote_edit(
        &mut self,
        message: BlockEditMessage,
        origin: Option<ClientId>,
    ) -> bool {
        let (global, block) = (message.position(), message.block());
        let Some(chunk) = self.chunks.get(global) else {
            tracing::debug!(pos = ?global, "remote edit for unloaded chunk dropped");
            return false;
        };
        let local = local_of(global);
        let mut blocks = chunk.blocks.write();
        if blocks.get_at(local).block_type() == block.block_type() {
            return true;
        }
        blocks.modify_from(local, block, true, EditSource::Peer(origin));
        true
    }

    // --- tick ---

    pub fn tick(&mut self) {
        let now_ms = self.started.elapsed().as_millis() as u64;
        self.ticks += 1;
        self.budget.reset();

        for done in self.pools.drain_completions() {
            match self.chunks.get_by_id_mut(done.chunk) {
                Some(chunk) => chunk.on_task_done(done.stage, done.success),
                None => tracing::debug!(
                    chunk = %done.chunk,
                    stage = ?done.stage,
                    "completion for removed chunk"
                ),
            }
        }

        let owed: Vec<ChunkId> = self.deferred_edges.keys().copied().collect();
        for id in owed {
            self.flush_edges(id);
        }

        let ids = self.chunks.ids();
        for &id in &ids {
            self.update_blocks(id, now_ms);
        }
        if self.config.pipeline.random_updates_per_tick > 0 {
            for &id in &ids {
                self.random_updates(id);
            }
        }

        let mut removed = Vec::new();
        for &id in &ids {
            let neighbors = self.chunks.neighbor_view(id);
            let Some(chunk) = self.chunks.get_by_id_mut(id) else {
                continue;
            };
            if chunk.state.take_external() == ChunkStateExternal::Saved {
                self.events.push(WorldEvent::Saved(chunk.pos));
            }
            let mut ctx = StageContext {
                features: &self.config.features,
                collab: &self.collab,
                pools: &self.pools,
                budget: &mut self.budget,
                neighbors: &neighbors,
                now_ms,
            };
            chunk.update_state(&mut ctx);
            if chunk.state.is_removed() {
                removed.push(id);
            }
        }

        for id in removed {
            if let Some(chunk) = self.chunks.remove_chunk(id) {
                tracing::debug!(chunk = ?chunk.pos, "chunk removed");
                self.events.push(WorldEvent::Removed(chunk.pos));
            }
        }
    }

    /// Ticks until `done` holds or `timeout` passes. Returns whether `done`
    /// held.
    pub fn tick_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&World) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            if done(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Applies the chunk's queued edits, mirrors boundary cells and releases
    /// throttled rebuilds. Skipped while the chunk's own job holds its store;
    /// mirrors into a busy neighbor wait for a later tick.
    fn update_blocks(&mut self, id: ChunkId, now_ms: u64) {
        let Some(chunk) = self.chunks.get_by_id(id) else {
            return;
        };
        let (pos, neighbors) = (chunk.pos, chunk.state.neighbors());
        let Some(mut blocks) = chunk.blocks.try_write() else {
            return;
        };
        let linked = chunk.state.linked_faces();
        let applied = blocks.apply_queued_edits(&self.collab.registry, pos, linked);
        let requests = blocks.schedule_rebuilds(now_ms, chunk.needs_collider, self.throttle);
        drop(blocks);

        for write in &applied.edge_writes {
            if let Some(neighbor) = neighbors[write.face.index()] {
                self.deferred_edges
                    .entry(neighbor)
                    .or_default()
                    .push((write.index, write.block));
                self.flush_edges(neighbor);
            }
        }
        if !applied.changed.is_empty() {
            tracing::trace!(chunk = ?pos, cells = applied.cells, "queued edits applied");
        }
        self.broadcast_changes(pos, &applied.changed);

        if let Some(bits) = requests.geometry {
            self.request_rebuild(id, &neighbors, bits, ChunkState::BuildVerticesNow);
        }
        if let Some(bits) = requests.collider {
            self.request_rebuild(id, &neighbors, bits, ChunkState::BuildCollider);
        }
    }

    /// Writes the padding cells owed to `id`, unless one of its jobs holds
    /// the store. Writes for removed chunks are dropped.
    fn flush_edges(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_by_id(id) else {
            self.deferred_edges.remove(&id);
            return;
        };
        let Some(mut blocks) = chunk.blocks.try_write() else {
            tracing::trace!(chunk = ?chunk.pos, "neighbor store busy, padding write deferred");
            return;
        };
        for (index, block) in self.deferred_edges.remove(&id).unwrap_or_default() {
            blocks.set_raw(index, block);
        }
    }

    fn broadcast_changes(&self, chunk_pos: IVec3, changed: &[ChangedCell]) {
        for cell in changed {
            let global = chunk_pos + cell.local;
            let network = &self.config.network;
            let message = match cell.source {
                EditSource::Peer(origin) => {
                    BlockEditMessage::for_remote_edit(network, global, cell.block, origin)
                }
                EditSource::Local => BlockEditMessage::for_local_edit(network, global, cell.block),
            };
            if let Some(message) = message
                && let Some(broadcaster) = &self.collab.broadcaster
            {
                broadcaster.broadcast(message);
            }
        }
    }

    /// Requests `state` on `id` and on the neighbors named by `bits`. Collider
    /// builds only reach neighbors that want a collider.
    fn request_rebuild(
        &mut self,
        id: ChunkId,
        neighbors: &[Option<ChunkId>; 6],
        bits: u8,
        state: ChunkState,
    ) {
        if let Some(chunk) = self.chunks.get_by_id_mut(id) {
            chunk.state.request_state(state);
        }
        for face in Face::ALL {
            if bits & face.bit() == 0 {
                continue;
            }
            let neighbor = neighbors[face.index()].and_then(|n| self.chunks.get_by_id_mut(n));
            let Some(neighbor) = neighbor else {
                continue;
            };
            if state != ChunkState::BuildCollider || neighbor.needs_collider {
                neighbor.state.request_state(state);
            }
        }
    }

    fn random_updates(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_by_id(id) else {
            return;
        };
        if !chunk.state.is_completed(Stage::Generate) {
            return;
        }
        let Some(mut blocks) = chunk.blocks.try_write() else {
            return;
        };
        for _ in 0..self.config.pipeline.random_updates_per_tick {
            let local = IVec3::new(
                self.rng.random_range(0..CHUNK_SIZE),
                self.rng.random_range(0..CHUNK_SIZE),
                self.rng.random_range(0..CHUNK_SIZE),
            );
            blocks.random_update(&self.collab.registry, chunk.pos, local);
        }
    }
}
