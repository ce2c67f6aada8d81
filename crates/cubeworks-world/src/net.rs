//! Block edit messages and the broadcast seam to the network transport.

use cubeworks_config::{NetworkConfig, NetworkRole};
use cubeworks_voxel::{BlockData, ChunkBlocks, ReceiveError, fragment_payload};
use crossbeam_channel::Sender;
use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Unique identifier for a connected client.
pub type ClientId = u64;

/// Errors encoding or decoding edit messages.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to encode block edit: {0}")]
    Encode(postcard::Error),
    #[error("failed to decode block edit: {0}")]
    Decode(postcard::Error),
}

/// A single changed block on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEditMessage {
    /// Server to clients. `exclude` names the client the edit came from.
    ServerBroadcast {
        pos: [i32; 3],
        block: u16,
        exclude: Option<ClientId>,
    },
    /// Client to server.
    ClientChange { pos: [i32; 3], block: u16 },
}

impl BlockEditMessage {
    /// Message announcing a locally applied edit, or `None` when nobody listens.
    pub fn for_local_edit(config: &NetworkConfig, global: IVec3, block: BlockData) -> Option<Self> {
        let pos = global.to_array();
        match config.role {
            NetworkRole::Server if config.allow_connections => Some(Self::ServerBroadcast {
                pos,
                block: block.raw(),
                exclude: None,
            }),
            NetworkRole::Client => Some(Self::ClientChange {
                pos,
                block: block.raw(),
            }),
            NetworkRole::Server | NetworkRole::Standalone => None,
        }
    }

    /// Relay of an edit received from `origin`. Only a listening server
    /// forwards remote edits, and never back to their origin.
    pub fn for_remote_edit(
        config: &NetworkConfig,
        global: IVec3,
        block: BlockData,
        origin: Option<ClientId>,
    ) -> Option<Self> {
        match config.role {
            NetworkRole::Server if config.allow_connections => Some(Self::ServerBroadcast {
                pos: global.to_array(),
                block: block.raw(),
                exclude: origin,
            }),
            _ => None,
        }
    }

    pub fn position(&self) -> IVec3 {
        match *self {
            Self::ServerBroadcast { pos, .. } | Self::ClientChange { pos, .. } => {
                IVec3::from_array(pos)
            }
        }
    }

    pub fn block(&self) -> BlockData {
        match *self {
            Self::ServerBroadcast { block, .. } | Self::ClientChange { block, .. } => {
                BlockData::from_raw(block)
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        postcard::to_allocvec(self).map_err(NetError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetError> {
        postcard::from_bytes(bytes).map_err(NetError::Decode)
    }
}

/// Sends edit messages towards peers. Called on the coordinating thread.
pub trait EditBroadcaster: Send + Sync {
    fn broadcast(&self, message: BlockEditMessage);
}

/// Forwards encoded edits over a channel, e.g. to an in-process peer or a
/// transport thread.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: Sender<Vec<u8>>,
}

impl ChannelBroadcaster {
    pub fn new(sender: Sender<Vec<u8>>) -> Self {
        Self { sender }
    }
}

impl EditBroadcaster for ChannelBroadcaster {
    fn broadcast(&self, message: BlockEditMessage) {
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "dropping block edit");
                return;
            }
        };
        if self.sender.send(bytes).is_err() {
            tracing::debug!("edit channel closed, dropping block edit");
        }
    }
}

/// Splits a chunk snapshot into transport fragments.
pub fn fragment_snapshot(
    blocks: &ChunkBlocks,
    config: &NetworkConfig,
) -> Result<Vec<Vec<u8>>, ReceiveError> {
    fragment_payload(&blocks.serialize(), config.header_size, config.max_fragment_size)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
