//! Pipeline stages, stage bitsets and the state requests understood by
//! [`ChunkStateMachine`](crate::state::ChunkStateMachine).

use std::fmt;

/// One step of the chunk pipeline, in driver priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Stage {
    LoadData = 0,
    PrepareGenerate = 1,
    Generate = 2,
    CalculateBounds = 3,
    PrepareSaveData = 4,
    SaveData = 5,
    Remove = 6,
    BuildCollider = 7,
    BuildVertices = 8,
}

impl Stage {
    /// Every stage in the order the driver tries them.
    pub const ALL: [Stage; 9] = [
        Stage::LoadData,
        Stage::PrepareGenerate,
        Stage::Generate,
        Stage::CalculateBounds,
        Stage::PrepareSaveData,
        Stage::SaveData,
        Stage::Remove,
        Stage::BuildCollider,
        Stage::BuildVertices,
    ];

    pub const fn bit(self) -> u16 {
        1 << (self as u8)
    }

    /// Stage that must be completed before this one may start.
    pub const fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::LoadData | Stage::Remove => None,
            Stage::PrepareGenerate | Stage::Generate => Some(Stage::LoadData),
            Stage::CalculateBounds
            | Stage::PrepareSaveData
            | Stage::BuildCollider
            | Stage::BuildVertices => Some(Stage::Generate),
            Stage::SaveData => Some(Stage::PrepareSaveData),
        }
    }

    /// Short name used in state dumps.
    pub const fn name(self) -> &'static str {
        match self {
            Stage::LoadData => "LoadData",
            Stage::PrepareGenerate => "PrepareGenerate",
            Stage::Generate => "Generate",
            Stage::CalculateBounds => "CalculateBounds",
            Stage::PrepareSaveData => "PrepareSaveData",
            Stage::SaveData => "SaveData",
            Stage::Remove => "Remove",
            Stage::BuildCollider => "BuildCollider",
            Stage::BuildVertices => "BuildVertices",
        }
    }
}

/// A set of stages packed into a `u16`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSet(u16);

impl StageSet {
    pub const EMPTY: StageSet = StageSet(0);

    pub const fn from_bits(bits: u16) -> StageSet {
        StageSet(bits & 0x01ff)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn remove(&mut self, stage: Stage) {
        self.0 &= !stage.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for (i, stage) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(stage.name())?;
        }
        Ok(())
    }
}

/// Progress of a single stage as seen by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageProgress {
    NotStarted,
    InFlight,
    Done,
}

/// A state that can be requested on a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkState {
    #[default]
    Idle,
    LoadData,
    PrepareGenerate,
    Generate,
    CalculateBounds,
    PrepareSaveData,
    SaveData,
    Remove,
    BuildCollider,
    BuildVertices,
    /// [`ChunkState::BuildVertices`] serviced ahead of ordinary work.
    BuildVerticesNow,
}

impl ChunkState {
    /// Stage whose pending bit this request sets.
    pub const fn stage(self) -> Option<Stage> {
        match self {
            ChunkState::Idle => None,
            ChunkState::LoadData => Some(Stage::LoadData),
            ChunkState::PrepareGenerate => Some(Stage::PrepareGenerate),
            ChunkState::Generate => Some(Stage::Generate),
            ChunkState::CalculateBounds => Some(Stage::CalculateBounds),
            ChunkState::PrepareSaveData => Some(Stage::PrepareSaveData),
            ChunkState::SaveData => Some(Stage::SaveData),
            ChunkState::Remove => Some(Stage::Remove),
            ChunkState::BuildCollider => Some(Stage::BuildCollider),
            ChunkState::BuildVertices | ChunkState::BuildVerticesNow => {
                Some(Stage::BuildVertices)
            }
        }
    }
}

/// Notification surfaced to code outside the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkStateExternal {
    #[default]
    None,
    Saved,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
