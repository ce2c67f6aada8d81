//! Chunk persistence: the save-handle seam used by the pipeline plus file
//! and in-memory backends.
//!
//! ## Payload Layout
//!
//! | Offset | Size | Field                                         |
//! |--------|------|-----------------------------------------------|
//! | 0      | 4    | Magic `b"CWCK"`                               |
//! | 4      | 1    | Format version (`1`)                          |
//! | 5      | 1    | Kind: `0` full snapshot, `1` differential     |
//! | 6      | ..   | `lz4_flex` block, uncompressed size prepended |
//!
//! The prepended size is checked against [`MAX_PAYLOAD_SIZE`] before anything
//! is allocated.
//!
//! A full body is a [`ChunkBlocks::serialize`] snapshot. A differential body
//! is a `u32 LE` count followed by `(u16 LE padded index, u16 LE block)`
//! pairs.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use cubeworks_voxel::transfer::MAX_PAYLOAD_SIZE;
use cubeworks_voxel::{BlockData, CellSnapshot, ChunkBlocks, ChunkSerError, PADDED_VOLUME};
use glam::IVec3;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

const MAGIC: &[u8; 4] = b"CWCK";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 6;
const KIND_FULL: u8 = 0;
const KIND_DIFF: u8 = 1;

/// Errors from any persistence step.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("chunk file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Nothing has been saved for this chunk yet.
    #[error("no saved data for chunk {0}")]
    NotFound(IVec3),
    /// The payload header or body is malformed.
    #[error("corrupt chunk payload: {0}")]
    Corrupt(String),
    /// The lz4 block could not be decompressed.
    #[error("chunk payload decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),
    /// The snapshot body was rejected by the block store.
    #[error("chunk snapshot rejected: {0}")]
    Snapshot(#[from] ChunkSerError),
    /// A step ran without the data the previous step should have produced.
    #[error("nothing to {0}")]
    NothingToWrite(&'static str),
}

/// Per-chunk persistence state threaded through the load and save stages.
///
/// Methods taking the block store run on the coordinator or inside a job
/// that holds the store's lock; the others only touch the handle.
pub trait ChunkSave: Send {
    /// Whether the last decompressed payload was differential.
    fn is_differential(&self) -> bool;
    /// Fetches the stored payload.
    fn read(&mut self) -> Result<(), StorageError>;
    /// Parses the fetched payload. Full snapshots are applied to `blocks`
    /// directly; differential ones are kept for [`ChunkSave::commit_changes`].
    fn do_decompression(&mut self, blocks: &mut ChunkBlocks) -> Result<(), StorageError>;
    /// Applies a kept differential payload over freshly generated cells
    /// and leaves the non-empty count unknown.
    fn commit_changes(&mut self, blocks: &mut ChunkBlocks);
    /// Captures what the next save must contain. Only copies; encoding is
    /// left to [`ChunkSave::do_compression`].
    fn consume_changes(&mut self, blocks: &ChunkBlocks);
    /// Encodes and compresses the captured changes.
    fn do_compression(&mut self) -> Result<(), StorageError>;
    /// Stores the compressed payload.
    fn write(&mut self) -> Result<(), StorageError>;
    /// Frees temporaries after a finished or abandoned save.
    fn mark_as_processed(&mut self);
}

/// Hands out [`ChunkSave`] handles.
pub trait ChunkStorage: Send + Sync {
    /// `differential` selects the format of payloads written through the handle.
    fn open(&self, chunk_pos: IVec3, differential: bool) -> Box<dyn ChunkSave>;
}

/// Raw byte storage keyed by chunk position.
pub trait PayloadStore: Clone + Send + Sync + 'static {
    fn load(&self, chunk_pos: IVec3) -> Result<Vec<u8>, StorageError>;
    fn store(&self, chunk_pos: IVec3, payload: &[u8]) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum SaveBody {
    Full(Vec<u8>),
    Diff(Vec<(u16, BlockData)>),
}

/// Captured by `consume_changes`, encoded by `do_compression`.
#[derive(Debug)]
enum Outgoing {
    Snapshot(CellSnapshot),
    Diff(Vec<(u16, BlockData)>),
}

fn encode_payload(body: SaveBody) -> Vec<u8> {
    let (kind, raw) = match body {
        SaveBody::Full(snapshot) => (KIND_FULL, snapshot),
        SaveBody::Diff(changes) => {
            let mut raw = Vec::with_capacity(4 + changes.len() * 4);
            raw.extend_from_slice(&(changes.len() as u32).to_le_bytes());
            for (index, block) in &changes {
                raw.extend_from_slice(&index.to_le_bytes());
                raw.extend_from_slice(&block.to_le_bytes());
            }
            (KIND_DIFF, raw)
        }
    };
    let mut payload = Vec::with_capacity(HEADER_LEN + raw.len() / 2);
    payload.extend_from_slice(MAGIC);
    payload.push(VERSION);
    payload.push(kind);
    payload.extend_from_slice(&lz4_flex::compress_prepend_size(&raw));
    payload
}

fn decode_payload(payload: &[u8]) -> Result<SaveBody, StorageError> {
    if payload.len() < HEADER_LEN || &payload[..4] != MAGIC {
        return Err(StorageError::Corrupt("bad magic".into()));
    }
    if payload[4] != VERSION {
        return Err(StorageError::Corrupt(format!("unknown version {}", payload[4])));
    }
    let block = &payload[HEADER_LEN..];
    let Some(size) = block.get(..4) else {
        return Err(StorageError::Corrupt("uncompressed size missing".into()));
    };
    let size = u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize;
    if size > MAX_PAYLOAD_SIZE {
        return Err(StorageError::Corrupt(format!(
            "uncompressed size {size} exceeds {MAX_PAYLOAD_SIZE}"
        )));
    }
    let raw = lz4_flex::decompress(&block[4..], size)?;
    match payload[5] {
        KIND_FULL => Ok(SaveBody::Full(raw)),
        KIND_DIFF => decode_diff(&raw).map(SaveBody::Diff),
        kind => Err(StorageError::Corrupt(format!("unknown payload kind {kind}"))),
    }
}

fn decode_diff(raw: &[u8]) -> Result<Vec<(u16, BlockData)>, StorageError> {
    let Some(count) = raw.get(..4) else {
        return Err(StorageError::Corrupt("differential count missing".into()));
    };
    let count = u32::from_le_bytes([count[0], count[1], count[2], count[3]]) as usize;
    let pairs = &raw[4..];
    if pairs.len() != count * 4 {
        return Err(StorageError::Corrupt(format!(
            "{count} changes need {} bytes, got {}",
            count * 4,
            pairs.len()
        )));
    }
    pairs
        .chunks_exact(4)
        .map(|pair| {
            let index = u16::from_le_bytes([pair[0], pair[1]]);
            if index as usize >= PADDED_VOLUME {
                return Err(StorageError::Corrupt(format!("cell index {index} out of range")));
            }
            Ok((index, BlockData::from_le_bytes([pair[2], pair[3]])))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Save handle
// ---------------------------------------------------------------------------

/// [`ChunkSave`] over any [`PayloadStore`].
pub struct SaveHandle<S: PayloadStore> {
    chunk_pos: IVec3,
    store: S,
    write_differential: bool,
    loaded_differential: bool,
    /// Payload fetched by `read`.
    loaded: Option<Vec<u8>>,
    /// Differential changes waiting for `commit_changes`.
    stashed: Option<Vec<(u16, BlockData)>>,
    /// Cells captured by `consume_changes`.
    outgoing: Option<Outgoing>,
    /// Payload produced by `do_compression`.
    compressed: Option<Vec<u8>>,
}

impl<S: PayloadStore> SaveHandle<S> {
    pub fn new(chunk_pos: IVec3, store: S, write_differential: bool) -> Self {
        Self {
            chunk_pos,
            store,
            write_differential,
            loaded_differential: false,
            loaded: None,
            stashed: None,
            outgoing: None,
            compressed: None,
        }
    }
}

impl<S: PayloadStore> ChunkSave for SaveHandle<S> {
    fn is_differential(&self) -> bool {
        self.loaded_differential
    }

    fn read(&mut self) -> Result<(), StorageError> {
        self.loaded = Some(self.store.load(self.chunk_pos)?);
        Ok(())
    }

    fn do_decompression(&mut self, blocks: &mut ChunkBlocks) -> Result<(), StorageError> {
        let payload = self
            .loaded
            .take()
            .ok_or(StorageError::NothingToWrite("decompress"))?;
        match decode_payload(&payload)? {
            SaveBody::Full(snapshot) => {
                blocks.deserialize(&snapshot)?;
                self.loaded_differential = false;
            }
            SaveBody::Diff(changes) => {
                tracing::trace!(chunk = ?self.chunk_pos, changes = changes.len(), "differential save loaded");
                self.stashed = Some(changes);
                self.loaded_differential = true;
            }
        }
        Ok(())
    }

    fn commit_changes(&mut self, blocks: &mut ChunkBlocks) {
        let Some(changes) = self.stashed.take() else {
            return;
        };
        // raw writes: a stored cell may differ from the generated one only
        // in rotation or solid flag
        for (index, block) in changes {
            blocks.set_raw(index as usize, block);
            blocks.mark_index_modified(index as usize);
        }
        blocks.invalidate_count();
    }

    fn consume_changes(&mut self, blocks: &ChunkBlocks) {
        let body = if self.write_differential {
            Outgoing::Diff(
                blocks
                    .modified_indices()
                    .into_iter()
                    .map(|index| (index, blocks.get(index as usize)))
                    .collect(),
            )
        } else {
            Outgoing::Snapshot(blocks.snapshot())
        };
        self.outgoing = Some(body);
    }

    fn do_compression(&mut self) -> Result<(), StorageError> {
        let body = self
            .outgoing
            .take()
            .ok_or(StorageError::NothingToWrite("compress"))?;
        let body = match body {
            Outgoing::Diff(changes) if changes.is_empty() => {
                return Err(StorageError::NothingToWrite("save"));
            }
            Outgoing::Diff(changes) => SaveBody::Diff(changes),
            Outgoing::Snapshot(snapshot) => SaveBody::Full(snapshot.serialize()),
        };
        self.compressed = Some(encode_payload(body));
        Ok(())
    }

    fn write(&mut self) -> Result<(), StorageError> {
        let payload = self
            .compressed
            .take()
            .ok_or(StorageError::NothingToWrite("write"))?;
        self.store.store(self.chunk_pos, &payload)
    }

    fn mark_as_processed(&mut self) {
        self.loaded = None;
        self.outgoing = None;
        self.compressed = None;
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// One file per chunk under a world directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn chunk_path(&self, chunk_pos: IVec3) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.chunk", chunk_pos.x, chunk_pos.y, chunk_pos.z))
    }
}

impl PayloadStore for FileStorage {
    fn load(&self, chunk_pos: IVec3) -> Result<Vec<u8>, StorageError> {
        match std::fs::read(self.chunk_path(chunk_pos)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(chunk_pos)),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, chunk_pos: IVec3, payload: &[u8]) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.chunk_path(chunk_pos);
        let tmp = path.with_extension("chunk.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        tracing::debug!(chunk = ?chunk_pos, path = %path.display(), bytes = payload.len(), "chunk saved");
        Ok(())
    }
}

impl ChunkStorage for FileStorage {
    fn open(&self, chunk_pos: IVec3, differential: bool) -> Box<dyn ChunkSave> {
        Box::new(SaveHandle::new(chunk_pos, self.clone(), differential))
    }
}

/// Payloads kept in memory; shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    payloads: Arc<Mutex<FxHashMap<IVec3, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, chunk_pos: IVec3) -> bool {
        self.payloads.lock().contains_key(&chunk_pos)
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    /// Stores raw bytes, bypassing the codec.
    pub fn insert_raw(&self, chunk_pos: IVec3, payload: Vec<u8>) {
        self.payloads.lock().insert(chunk_pos, payload);
    }
}

impl PayloadStore for MemoryStorage {
    fn load(&self, chunk_pos: IVec3) -> Result<Vec<u8>, StorageError> {
        self.payloads
            .lock()
            .get(&chunk_pos)
            .cloned()
            .ok_or(StorageError::NotFound(chunk_pos))
    }

    fn store(&self, chunk_pos: IVec3, payload: &[u8]) -> Result<(), StorageError> {
        self.payloads.lock().insert(chunk_pos, payload.to_vec());
        Ok(())
    }
}

impl ChunkStorage for MemoryStorage {
    fn open(&self, chunk_pos: IVec3, differential: bool) -> Box<dyn ChunkSave> {
        Box::new(SaveHandle::new(chunk_pos, self.clone(), differential))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
