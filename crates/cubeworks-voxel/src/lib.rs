//! Block cells, padded chunk stores, run-length snapshots and fragmented
//! snapshot transfer.

pub mod behavior;
pub mod block_data;
pub mod chunk_blocks;
pub mod chunk_serial;
pub mod coords;
pub mod registry;
pub mod rle;
pub mod transfer;

pub use behavior::{BlockBehavior, BlockHookContext, FollowUpEdit, GrowingBlock};
pub use block_data::{AIR_TYPE, BlockData, Direction};
pub use chunk_blocks::{
    AppliedEdits, ChangedCell, ChunkBlocks, EdgeWrite, EditSource, RebuildMask, RebuildRequests,
    RebuildThrottle, ReceiveProgress,
};
pub use chunk_serial::{CellSnapshot, ChunkSerError};
pub use coords::{
    CHUNK_EDGE, CHUNK_SIZE, CHUNK_VOLUME, Face, PADDED_AREA, PADDED_SIZE, PADDED_VOLUME,
    chunk_pos_of, floor_mod, local_of, neighbor_chunk_pos, padded_coords, padded_index,
};
pub use registry::{BlockRegistry, BlockTypeDef, RegistryError};
pub use rle::RleError;
pub use transfer::{ChunkReceiver, ReceiveError, fragment_payload};
