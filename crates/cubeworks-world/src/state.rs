//! Per-chunk pipeline bookkeeping.
//!
//! [`ChunkStateMachine`] only records what is pending, what completed and who
//! the neighbors are. Running a stage is up to the owner (see
//! `crate::pipeline`), which asks [`ChunkStateMachine::step`] whether a stage
//! may start and reports completions back.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use cubeworks_voxel::Face;

use crate::chunk::ChunkId;
use crate::stage::{ChunkState, ChunkStateExternal, Stage, StageProgress, StageSet};

/// Read-only view of a chunk's completed stages for other threads.
#[derive(Clone, Debug, Default)]
pub struct SafeStateView(Arc<AtomicU16>);

impl SafeStateView {
    pub fn completed(&self) -> StageSet {
        StageSet::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed().contains(stage)
    }

    fn publish(&self, set: StageSet) {
        self.0.store(set.bits(), Ordering::Release);
    }
}

/// What the driver should do with one stage this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStep {
    /// Not requested (or gated off by visibility); try the next stage.
    NotPending,
    /// Requested and every precondition the machine can see holds.
    Ready,
    /// Requested but blocked; lower-priority stages must not run.
    Wait,
    /// Requested but not yet allowed; lower-priority stages may run.
    Skip,
}

/// Result of [`ChunkStateMachine::next_action`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAction {
    Run(Stage),
    Wait(Stage),
    Idle,
}

/// Pending/completed stage sets plus neighbor links of one chunk.
#[derive(Debug)]
pub struct ChunkStateMachine {
    pending: StageSet,
    completed: StageSet,
    safe: SafeStateView,
    in_flight: Option<Stage>,
    build_now: bool,
    next: ChunkState,
    external: ChunkStateExternal,
    neighbors: [Option<ChunkId>; 6],
    removal_requested: bool,
    save_needed: bool,
    sync_edges: bool,
    visible: bool,
    possibly_visible: bool,
}

impl Default for ChunkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStateMachine {
    pub fn new() -> Self {
        Self {
            pending: StageSet::EMPTY,
            completed: StageSet::EMPTY,
            safe: SafeStateView::default(),
            in_flight: None,
            build_now: false,
            next: ChunkState::Idle,
            external: ChunkStateExternal::None,
            neighbors: [None; 6],
            removal_requested: false,
            save_needed: false,
            sync_edges: true,
            visible: false,
            possibly_visible: false,
        }
    }

    /// Clears every flag. Neighbor links are left to the caller, which must
    /// unsubscribe both sides first.
    pub fn reset(&mut self) {
        let safe = self.safe.clone();
        let neighbors = self.neighbors;
        *self = Self::new();
        self.safe = safe;
        self.neighbors = neighbors;
        self.safe.publish(StageSet::EMPTY);
    }

    // --- requests ---

    pub fn request_state(&mut self, state: ChunkState) {
        let Some(stage) = state.stage() else {
            return;
        };
        self.pending.insert(stage);
        match state {
            ChunkState::BuildVerticesNow => self.build_now = true,
            ChunkState::Remove => self.removal_requested = true,
            _ => {}
        }
    }

    /// Hint for the state to request before the next stage is tried.
    pub fn set_next(&mut self, state: ChunkState) {
        self.next = state;
    }

    pub fn next_state(&self) -> ChunkState {
        self.next
    }

    /// Turns the next-state hint into a request.
    pub fn process_notify_state(&mut self) {
        let next = std::mem::take(&mut self.next);
        self.request_state(next);
    }

    // --- stage bits ---

    pub fn pending(&self) -> StageSet {
        self.pending
    }

    pub fn completed(&self) -> StageSet {
        self.completed
    }

    pub fn is_pending(&self, stage: Stage) -> bool {
        self.pending.contains(stage)
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed.contains(stage)
    }

    pub fn progress(&self, stage: Stage) -> StageProgress {
        if self.in_flight == Some(stage) {
            StageProgress::InFlight
        } else if self.completed.contains(stage) {
            StageProgress::Done
        } else {
            StageProgress::NotStarted
        }
    }

    /// Drops the pending and completed bits of `stage` before it runs again.
    pub fn begin_stage(&mut self, stage: Stage) {
        self.pending.remove(stage);
        self.completed.remove(stage);
        if stage == Stage::BuildVertices {
            self.build_now = false;
        }
        self.safe.publish(self.completed);
    }

    pub fn complete(&mut self, stage: Stage) {
        self.completed.insert(stage);
        self.safe.publish(self.completed);
    }

    /// `true` when the pending vertex build was requested with priority.
    pub fn build_now(&self) -> bool {
        self.build_now
    }

    pub fn safe_view(&self) -> SafeStateView {
        self.safe.clone()
    }

    /// Marks the mesh as consumed so the next `BuildVertices` is real work.
    pub fn set_mesh_built(&mut self) {
        self.completed.remove(Stage::BuildVertices);
        self.safe.publish(self.completed);
    }

    pub fn set_collider_built(&mut self) {
        self.completed.remove(Stage::BuildCollider);
        self.safe.publish(self.completed);
    }

    // --- background task ---

    pub fn in_flight(&self) -> Option<Stage> {
        self.in_flight
    }

    pub fn begin_task(&mut self, stage: Stage) {
        debug_assert!(
            self.in_flight.is_none(),
            "second task submitted while {:?} runs",
            self.in_flight
        );
        self.in_flight = Some(stage);
    }

    pub fn end_task(&mut self) -> Option<Stage> {
        self.in_flight.take()
    }

    // --- external notification ---

    pub fn set_external(&mut self, external: ChunkStateExternal) {
        self.external = external;
    }

    pub fn take_external(&mut self) -> ChunkStateExternal {
        std::mem::take(&mut self.external)
    }

    // --- flags ---

    pub fn removal_requested(&self) -> bool {
        self.removal_requested
    }

    pub fn is_removed(&self) -> bool {
        self.completed.contains(Stage::Remove)
    }

    pub fn save_needed(&self) -> bool {
        self.save_needed
    }

    pub fn set_save_needed(&mut self, needed: bool) {
        self.save_needed = needed;
    }

    /// `true` until the one-shot edge copy from the neighbors has run.
    pub fn needs_edge_sync(&self) -> bool {
        self.sync_edges
    }

    pub fn mark_edges_synced(&mut self) {
        self.sync_edges = false;
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn possibly_visible(&self) -> bool {
        self.possibly_visible
    }

    pub fn set_possibly_visible(&mut self, possibly_visible: bool) {
        self.possibly_visible = possibly_visible;
    }

    // --- neighbors ---

    pub fn neighbors(&self) -> [Option<ChunkId>; 6] {
        self.neighbors
    }

    pub fn neighbor(&self, face: Face) -> Option<ChunkId> {
        self.neighbors[face.index()]
    }

    pub fn set_neighbor(&mut self, face: Face, neighbor: Option<ChunkId>) {
        self.neighbors[face.index()] = neighbor;
    }

    pub fn listener_count(&self) -> usize {
        self.neighbors.iter().flatten().count()
    }

    /// [`Face::bit`] set of the subscribed neighbors.
    pub fn linked_faces(&self) -> u8 {
        Face::ALL
            .iter()
            .filter(|face| self.neighbors[face.index()].is_some())
            .fold(0, |bits, face| bits | face.bit())
    }

    // --- driver decisions ---

    /// Decides whether `stage` may start. `neighbors_generated` tells whether
    /// every subscribed neighbor completed `Generate`.
    pub fn step(&self, stage: Stage, neighbors_generated: bool) -> StageStep {
        if !self.pending.contains(stage) {
            return StageStep::NotPending;
        }
        match stage {
            Stage::LoadData if !self.possibly_visible => StageStep::NotPending,
            Stage::LoadData => StageStep::Ready,
            Stage::Remove => {
                if !self.completed.contains(Stage::LoadData) {
                    StageStep::Ready
                } else if self.completed.contains(Stage::Generate) && !self.save_needed {
                    StageStep::Ready
                } else {
                    StageStep::Skip
                }
            }
            Stage::BuildVertices if !self.visible => StageStep::NotPending,
            Stage::BuildCollider | Stage::BuildVertices => {
                if !self.completed.contains(Stage::Generate)
                    || self.listener_count() != Face::ALL.len()
                    || !neighbors_generated
                {
                    StageStep::Wait
                } else {
                    StageStep::Ready
                }
            }
            _ => match stage.prerequisite() {
                Some(required) if !self.completed.contains(required) => StageStep::Wait,
                _ => StageStep::Ready,
            },
        }
    }

    /// First stage the driver would run, or the stage it is blocked on.
    pub fn next_action(&self, neighbors_generated: bool) -> NextAction {
        if self.in_flight.is_some() {
            return NextAction::Idle;
        }
        for stage in Stage::ALL {
            match self.step(stage, neighbors_generated) {
                StageStep::NotPending | StageStep::Skip => continue,
                StageStep::Ready => return NextAction::Run(stage),
                StageStep::Wait => return NextAction::Wait(stage),
            }
        }
        NextAction::Idle
    }
}

impl fmt::Display for ChunkStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N={:?}, P={}, C={}", self.next, self.pending, self.completed)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
