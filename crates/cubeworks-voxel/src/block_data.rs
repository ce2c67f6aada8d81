//! Packed 16-bit block cell: type index, solidity flag and rotation.
//!
//! | Bits  | Field                      |
//! |-------|----------------------------|
//! | 15    | solid flag                 |
//! | 12-14 | rotation ([`Direction`])   |
//! | 0-11  | block type index           |

use serde::{Deserialize, Serialize};

/// Mask of the 12 type bits.
pub const TYPE_MASK: u16 = 0x0FFF;
const ROTATION_SHIFT: u16 = 12;
const ROTATION_MASK: u16 = 0x7;
const SOLID_BIT: u16 = 1 << 15;

/// Type index reserved for air. Zeroed memory is empty space.
pub const AIR_TYPE: u16 = 0;

/// Facing of a block, stored in three bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    #[default]
    Up = 0,
    Down = 1,
    North = 2,
    East = 3,
    South = 4,
    West = 5,
}

impl Direction {
    /// All six directions in encoding order.
    pub const ALL: [Direction; 6] = [
        Direction::Up,
        Direction::Down,
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Decodes three rotation bits. The two unused encodings read as `Up`.
    pub fn from_bits(bits: u8) -> Direction {
        match bits & ROTATION_MASK as u8 {
            1 => Direction::Down,
            2 => Direction::North,
            3 => Direction::East,
            4 => Direction::South,
            5 => Direction::West,
            _ => Direction::Up,
        }
    }
}

/// One block cell. `Copy`, two bytes, compared by raw value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockData(u16);

impl BlockData {
    /// The empty block.
    pub const AIR: BlockData = BlockData(0);

    /// Packs a block. `type_index` is truncated to its 12 low bits.
    pub const fn new(type_index: u16, solid: bool, rotation: Direction) -> Self {
        let mut raw = type_index & TYPE_MASK;
        raw |= ((rotation as u16) & ROTATION_MASK) << ROTATION_SHIFT;
        if solid {
            raw |= SOLID_BIT;
        }
        BlockData(raw)
    }

    /// Non-solid, unrotated block of the given type.
    pub const fn of_type(type_index: u16) -> Self {
        BlockData(type_index & TYPE_MASK)
    }

    pub const fn from_raw(raw: u16) -> Self {
        BlockData(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Block type index (0-4095).
    pub const fn block_type(self) -> u16 {
        self.0 & TYPE_MASK
    }

    pub const fn is_solid(self) -> bool {
        self.0 & SOLID_BIT != 0
    }

    pub fn rotation(self) -> Direction {
        Direction::from_bits(((self.0 >> ROTATION_SHIFT) & ROTATION_MASK) as u8)
    }

    pub const fn is_air(self) -> bool {
        self.block_type() == AIR_TYPE
    }

    pub fn with_rotation(self, rotation: Direction) -> Self {
        BlockData::new(self.block_type(), self.is_solid(), rotation)
    }

    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 2]) -> Self {
        BlockData(u16::from_le_bytes(bytes))
    }

    /// Reads a block stored little-endian at `offset`, if two bytes are available.
    pub fn read_at(buf: &[u8], offset: usize) -> Option<Self> {
        let bytes = buf.get(offset..offset.checked_add(2)?)?;
        Some(BlockData::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Writes the block little-endian at `offset`. Returns `false` if `buf` is too short.
    pub fn write_at(self, buf: &mut [u8], offset: usize) -> bool {
        let Some(end) = offset.checked_add(2) else {
            return false;
        };
        match buf.get_mut(offset..end) {
            Some(slot) => {
                slot.copy_from_slice(&self.to_le_bytes());
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
