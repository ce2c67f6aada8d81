//! Run-length encoding of block cell arrays.
//!
//! Each run is 6 bytes on the wire: `count: i32 LE` followed by the cell as
//! `u16 LE`. Counts are always positive.

use crate::block_data::BlockData;

/// Encoded size of one run.
pub const RUN_BYTES: usize = 6;

/// A single RLE run: `count` consecutive occurrences of `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RleRun {
    /// Number of consecutive identical cells (1..=i32::MAX).
    pub count: u32,
    pub value: BlockData,
}

/// Errors that can occur during RLE decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RleError {
    /// The byte stream ends inside a run.
    #[error("RLE data truncated: {remaining} trailing bytes at offset {offset}")]
    Truncated {
        /// Offset of the incomplete run.
        offset: usize,
        /// Bytes left at that offset.
        remaining: usize,
    },
    /// A run count is zero or negative.
    #[error("invalid RLE run length {0}")]
    InvalidRunLength(i32),
    /// The runs describe more cells than the destination holds.
    #[error("RLE runs overflow destination of {capacity} cells")]
    Overflow {
        /// Destination length.
        capacity: usize,
    },
    /// Decoded length does not match expected length.
    #[error("RLE length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected number of cells.
        expected: usize,
        /// Actual number of decoded cells.
        actual: usize,
    },
}

/// Encodes a slice of cells into RLE runs.
///
/// An empty input produces an empty output.
pub fn rle_encode(cells: &[BlockData]) -> Vec<RleRun> {
    let mut runs: Vec<RleRun> = Vec::new();
    for &cell in cells {
        match runs.last_mut() {
            Some(run) if run.value == cell && run.count < i32::MAX as u32 => run.count += 1,
            _ => runs.push(RleRun {
                count: 1,
                value: cell,
            }),
        }
    }
    runs
}

/// Appends the wire form of `runs` to `out`.
pub fn rle_write(runs: &[RleRun], out: &mut Vec<u8>) {
    out.reserve(runs.len() * RUN_BYTES);
    for run in runs {
        out.extend_from_slice(&(run.count as i32).to_le_bytes());
        out.extend_from_slice(&run.value.to_le_bytes());
    }
}

/// Decodes wire runs from `data` into `out`, which must end up exactly filled.
///
/// `out` may be partially written when an error is returned.
pub fn rle_decode_into(data: &[u8], out: &mut [BlockData]) -> Result<(), RleError> {
    let mut written = 0usize;
    let mut offset = 0usize;
    while offset < data.len() {
        let Some(bytes) = data.get(offset..offset + RUN_BYTES) else {
            return Err(RleError::Truncated {
                offset,
                remaining: data.len() - offset,
            });
        };
        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if count <= 0 {
            return Err(RleError::InvalidRunLength(count));
        }
        let value = BlockData::from_le_bytes([bytes[4], bytes[5]]);
        let end = written
            .checked_add(count as usize)
            .filter(|&end| end <= out.len())
            .ok_or(RleError::Overflow {
                capacity: out.len(),
            })?;
        out[written..end].fill(value);
        written = end;
        offset += RUN_BYTES;
    }
    if written != out.len() {
        return Err(RleError::LengthMismatch {
            expected: out.len(),
            actual: written,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(raw: u16) -> BlockData {
        BlockData::from_raw(raw)
    }

    #[test]
    fn test_uniform_array_single_run() {
        let cells = vec![BlockData::AIR; 5832];
        let runs = rle_encode(&cells);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].count, 5832);
        assert_eq!(runs[0].value, BlockData::AIR);
    }

    #[test]
    fn test_alternating_cells_no_compression() {
        let cells: Vec<BlockData> = (0..64).map(|i| cell(i % 2)).collect();
        assert_eq!(rle_encode(&cells).len(), 64);
    }

    #[test]
    fn test_wire_roundtrip_terrain_layers() {
        let mut cells = Vec::with_capacity(1000);
        cells.extend(std::iter::repeat_n(cell(0x8001), 400));
        cells.extend(std::iter::repeat_n(cell(0x8002), 100));
        cells.extend(std::iter::repeat_n(BlockData::AIR, 500));

        let mut bytes = Vec::new();
        rle_write(&rle_encode(&cells), &mut bytes);
        assert_eq!(bytes.len(), 3 * RUN_BYTES);

        let mut decoded = vec![BlockData::AIR; 1000];
        rle_decode_into(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded, cells);
    }

    #[test]
    fn test_run_layout_is_i32_then_u16() {
        let mut bytes = Vec::new();
        rle_write(
            &[RleRun {
                count: 3,
                value: cell(0x1234),
            }],
            &mut bytes,
        );
        assert_eq!(bytes, vec![3, 0, 0, 0, 0x34, 0x12]);
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut bytes = Vec::new();
        rle_write(
            &[RleRun {
                count: 10,
                value: cell(1),
            }],
            &mut bytes,
        );
        let mut out = vec![BlockData::AIR; 20];
        assert_eq!(
            rle_decode_into(&bytes, &mut out),
            Err(RleError::LengthMismatch {
                expected: 20,
                actual: 10
            })
        );
    }

    #[test]
    fn test_decode_overflow() {
        let mut bytes = Vec::new();
        rle_write(
            &[RleRun {
                count: 11,
                value: cell(1),
            }],
            &mut bytes,
        );
        let mut out = vec![BlockData::AIR; 10];
        assert_eq!(
            rle_decode_into(&bytes, &mut out),
            Err(RleError::Overflow { capacity: 10 })
        );
    }

    #[test]
    fn test_decode_truncated_run() {
        let mut out = vec![BlockData::AIR; 4];
        let bytes = [4, 0, 0, 0, 1];
        assert_eq!(
            rle_decode_into(&bytes, &mut out),
            Err(RleError::Truncated {
                offset: 0,
                remaining: 5
            })
        );
    }

    #[test]
    fn test_decode_rejects_non_positive_count() {
        let mut out = vec![BlockData::AIR; 4];
        let mut bytes = (-2i32).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            rle_decode_into(&bytes, &mut out),
            Err(RleError::InvalidRunLength(-2))
        );
    }
}
