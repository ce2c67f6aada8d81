//! Chunk dimensions, padded cell indexing and chunk/local coordinate math.
//!
//! A chunk stores `CHUNK_SIZE³` cells plus a one-cell border on every side,
//! so local coordinates range over `-1..=CHUNK_SIZE`. Y is the outermost axis
//! of the padded layout, which keeps each horizontal slab contiguous.

use glam::IVec3;

/// Side length of a chunk in cells.
pub const CHUNK_SIZE: i32 = 16;

/// Largest inner local coordinate.
pub const CHUNK_EDGE: i32 = CHUNK_SIZE - 1;

/// Side length including the border.
pub const PADDED_SIZE: i32 = CHUNK_SIZE + 2;

/// Cells in one padded horizontal slab.
pub const PADDED_AREA: usize = (PADDED_SIZE * PADDED_SIZE) as usize;

/// Cells in the padded array.
pub const PADDED_VOLUME: usize = PADDED_AREA * PADDED_SIZE as usize;

/// Inner cells of a chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// One of the six axis-aligned neighbors of a chunk.
///
/// The discriminant is the neighbor's bit in rebuild masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Face {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl Face {
    /// All six faces in bit order.
    pub const ALL: [Face; 6] = [
        Face::PosX,
        Face::NegX,
        Face::PosY,
        Face::NegY,
        Face::PosZ,
        Face::NegZ,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit of this neighbor in a rebuild mask.
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub const fn opposite(self) -> Face {
        match self {
            Face::PosX => Face::NegX,
            Face::NegX => Face::PosX,
            Face::PosY => Face::NegY,
            Face::NegY => Face::PosY,
            Face::PosZ => Face::NegZ,
            Face::NegZ => Face::PosZ,
        }
    }

    /// Axis perpendicular to the face: 0=X, 1=Y, 2=Z.
    pub const fn axis(self) -> usize {
        match self {
            Face::PosX | Face::NegX => 0,
            Face::PosY | Face::NegY => 1,
            Face::PosZ | Face::NegZ => 2,
        }
    }

    pub const fn is_positive(self) -> bool {
        matches!(self, Face::PosX | Face::PosY | Face::PosZ)
    }

    /// Unit step towards the neighbor.
    pub fn offset(self) -> IVec3 {
        let mut step = IVec3::ZERO;
        step[self.axis()] = if self.is_positive() { 1 } else { -1 };
        step
    }

    /// Inner local coordinate on this face's axis that borders the neighbor.
    pub const fn boundary_coord(self) -> i32 {
        if self.is_positive() { CHUNK_EDGE } else { 0 }
    }

    /// Padding coordinate on this face's axis, on the neighbor's side.
    pub const fn padding_coord(self) -> i32 {
        if self.is_positive() { CHUNK_SIZE } else { -1 }
    }
}

/// Index of a padded local coordinate. Each component must be in `-1..=CHUNK_SIZE`.
#[inline]
pub fn padded_index(local: IVec3) -> usize {
    debug_assert!(is_padded_coord(local), "local {local} outside padded chunk");
    let x = (local.x + 1) as usize;
    let y = (local.y + 1) as usize;
    let z = (local.z + 1) as usize;
    x + z * PADDED_SIZE as usize + y * PADDED_AREA
}

/// Inverse of [`padded_index`].
#[inline]
pub fn padded_coords(index: usize) -> IVec3 {
    debug_assert!(index < PADDED_VOLUME);
    let side = PADDED_SIZE as usize;
    let x = index % side;
    let z = (index / side) % side;
    let y = index / PADDED_AREA;
    IVec3::new(x as i32 - 1, y as i32 - 1, z as i32 - 1)
}

pub fn is_padded_coord(local: IVec3) -> bool {
    local.cmpge(IVec3::splat(-1)).all() && local.cmple(IVec3::splat(CHUNK_SIZE)).all()
}

pub fn is_inner_coord(local: IVec3) -> bool {
    local.cmpge(IVec3::ZERO).all() && local.cmple(IVec3::splat(CHUNK_EDGE)).all()
}

/// Mathematical modulo; the result is always in `0..m` for positive `m`.
#[inline]
pub fn floor_mod(value: i32, m: i32) -> i32 {
    value.rem_euclid(m)
}

/// Local coordinate of a global cell inside its chunk.
pub fn local_of(global: IVec3) -> IVec3 {
    IVec3::new(
        floor_mod(global.x, CHUNK_SIZE),
        floor_mod(global.y, CHUNK_SIZE),
        floor_mod(global.z, CHUNK_SIZE),
    )
}

/// Position (in cells, a multiple of `CHUNK_SIZE`) of the chunk containing `global`.
pub fn chunk_pos_of(global: IVec3) -> IVec3 {
    global - local_of(global)
}

/// Position of the chunk adjacent to `chunk_pos` across `face`.
pub fn neighbor_chunk_pos(chunk_pos: IVec3, face: Face) -> IVec3 {
    chunk_pos + face.offset() * CHUNK_SIZE
}

/// Faces whose neighbor shares the inner cell `local` in its padding.
pub fn boundary_faces(local: IVec3) -> impl Iterator<Item = Face> {
    Face::ALL
        .into_iter()
        .filter(move |face| local[face.axis()] == face.boundary_coord())
}

/// Index in the neighbor across `face` of the padding cell mirroring `local`.
pub fn neighbor_padding_index(local: IVec3, face: Face) -> usize {
    let mut mirrored = local;
    mirrored[face.axis()] = face.opposite().padding_coord();
    padded_index(mirrored)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
