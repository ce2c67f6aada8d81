//! Snapshot encoding of a [`ChunkBlocks`] store.
//!
//! ## Binary Layout
//!
//! | Offset | Size  | Field                                          |
//! |--------|-------|------------------------------------------------|
//! | 0      | 4     | Non-empty inner cell count (`i32`, LE)         |
//! | 4      | N×6   | RLE runs over the padded array (omitted if 0)  |
//!
//! Runs cover all `PADDED_VOLUME` cells in padded index order.

use crate::block_data::BlockData;
use crate::chunk_blocks::{ChunkBlocks, count_inner_non_empty};
use crate::coords::{CHUNK_VOLUME, PADDED_VOLUME};
use crate::rle::{RleError, rle_decode_into, rle_encode, rle_write};

/// Size of the count header.
pub const SNAPSHOT_HEADER: usize = 4;

/// Errors that can occur during snapshot deserialization.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkSerError {
    /// The data is shorter than the header.
    #[error("snapshot truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The header count is negative or exceeds the inner volume.
    #[error("invalid non-empty count {0}")]
    InvalidCount(i32),
    /// A run count is zero or negative.
    #[error("invalid run length {0}")]
    InvalidRunLength(i32),
    /// The runs describe more cells than the padded array holds.
    #[error("runs overflow the {capacity}-cell array")]
    RunOverflow {
        /// Cells in the padded array.
        capacity: usize,
    },
    /// The runs describe fewer cells than the padded array holds.
    #[error("runs cover {actual} of {expected} cells")]
    LengthMismatch {
        /// Cells in the padded array.
        expected: usize,
        /// Cells covered by the runs.
        actual: usize,
    },
    /// Bytes left over that do not form a complete run.
    #[error("{remaining} trailing bytes at offset {offset}")]
    TrailingBytes {
        /// Offset of the stray bytes.
        offset: usize,
        /// Number of stray bytes.
        remaining: usize,
    },
}

impl From<RleError> for ChunkSerError {
    fn from(err: RleError) -> Self {
        match err {
            RleError::Truncated { offset, remaining } => ChunkSerError::TrailingBytes {
                offset: offset + SNAPSHOT_HEADER,
                remaining,
            },
            RleError::InvalidRunLength(count) => ChunkSerError::InvalidRunLength(count),
            RleError::Overflow { capacity } => ChunkSerError::RunOverflow { capacity },
            RleError::LengthMismatch { expected, actual } => {
                ChunkSerError::LengthMismatch { expected, actual }
            }
        }
    }
}

/// Copy of a store's cells taken with [`ChunkBlocks::snapshot`], encoded
/// later without holding the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellSnapshot {
    cells: Box<[BlockData]>,
    non_empty: Option<u32>,
}

impl CellSnapshot {
    /// The bytes [`ChunkBlocks::serialize`] returned when the copy was taken.
    pub fn serialize(&self) -> Vec<u8> {
        encode_cells(&self.cells, self.non_empty)
    }
}

fn encode_cells(cells: &[BlockData], non_empty: Option<u32>) -> Vec<u8> {
    let count = non_empty.unwrap_or_else(|| count_inner_non_empty(cells));
    let mut buf = Vec::with_capacity(SNAPSHOT_HEADER + 64);
    buf.extend_from_slice(&(count as i32).to_le_bytes());
    if count > 0 {
        rle_write(&rle_encode(cells), &mut buf);
    }
    buf
}

impl ChunkBlocks {
    /// Encodes the store. An unknown non-empty count is computed on the fly.
    pub fn serialize(&self) -> Vec<u8> {
        encode_cells(&self.cells, self.non_empty)
    }

    /// Copies the cells for a later [`CellSnapshot::serialize`].
    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            cells: self.cells.clone(),
            non_empty: self.non_empty,
        }
    }

    /// Replaces the cells with a decoded snapshot.
    ///
    /// Decoding goes through a scratch buffer, so on error the store is left
    /// untouched. Queued edits and the modified list are kept.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), ChunkSerError> {
        if data.len() < SNAPSHOT_HEADER {
            return Err(ChunkSerError::Truncated {
                expected: SNAPSHOT_HEADER,
                actual: data.len(),
            });
        }
        let count = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if count < 0 || count as usize > CHUNK_VOLUME {
            return Err(ChunkSerError::InvalidCount(count));
        }

        let runs = &data[SNAPSHOT_HEADER..];
        if count == 0 {
            if !runs.is_empty() {
                return Err(ChunkSerError::TrailingBytes {
                    offset: SNAPSHOT_HEADER,
                    remaining: runs.len(),
                });
            }
            self.cells.fill(BlockData::AIR);
            self.non_empty = Some(0);
            return Ok(());
        }

        let mut scratch = vec![BlockData::AIR; PADDED_VOLUME].into_boxed_slice();
        rle_decode_into(runs, &mut scratch)?;
        self.cells = scratch;

        let recounted = self.count_non_empty();
        if recounted != count as u32 {
            tracing::debug!(header = count, recounted, "snapshot count disagrees with cells");
        }
        self.non_empty = Some(recounted);
        self.set_bounds_recalculation(true);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
