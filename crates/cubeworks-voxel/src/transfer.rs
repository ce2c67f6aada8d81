//! Fragmented transfer of serialized chunk snapshots.
//!
//! Every fragment is laid out as
//!
//! | Size          | Field                                            |
//! |---------------|--------------------------------------------------|
//! | `header_size` | transport header, opaque here                    |
//! | 4             | `i32 LE` write offset of this fragment's payload |
//! | 4             | `i32 LE` total payload size                      |
//! | rest          | payload bytes                                    |
//!
//! Fragments arrive in order. Only the first fragment's offset and size are
//! used to set up the receive buffer.

use crate::coords::PADDED_VOLUME;
use crate::rle::RUN_BYTES;

/// Bytes following the transport header: offset and total size.
pub const LEADER_FIELDS: usize = 8;

/// Largest payload a chunk snapshot can serialize to.
pub const MAX_PAYLOAD_SIZE: usize = 4 + PADDED_VOLUME * RUN_BYTES;

/// Errors produced while splitting or assembling fragments.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReceiveError {
    /// The fragment does not even hold its leader.
    #[error("fragment of {len} bytes shorter than its {needed}-byte leader")]
    FragmentTooShort {
        /// Fragment length.
        len: usize,
        /// Header plus leader fields.
        needed: usize,
    },
    /// The declared total size is not a plausible snapshot size.
    #[error("invalid total payload size {0}")]
    InvalidTotalSize(i32),
    /// The first fragment's write offset lies outside the payload.
    #[error("write offset {offset} outside payload of {total} bytes")]
    OffsetOutOfRange {
        /// Declared offset.
        offset: i32,
        /// Declared total size.
        total: usize,
    },
    /// `max_fragment_size` leaves no room for payload bytes.
    #[error("fragments of {max} bytes cannot carry a {leader}-byte leader and payload")]
    NoRoomForPayload {
        /// Configured fragment size.
        max: usize,
        /// Header plus leader fields.
        leader: usize,
    },
}

/// Running state of one snapshot being received.
#[derive(Debug, Default)]
pub struct ChunkReceiver {
    buffer: Option<Vec<u8>>,
    offset: usize,
}

impl ChunkReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` between the first fragment and completion.
    pub fn is_receiving(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bytes written so far and the declared total, while receiving.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.buffer.as_ref().map(|b| (self.offset, b.len()))
    }

    /// Appends one fragment and returns the assembled payload once complete.
    ///
    /// Payload bytes past the declared total are ignored. The receiver is
    /// empty again after completion or after an error.
    pub fn receive(
        &mut self,
        fragment: &[u8],
        header_size: usize,
    ) -> Result<Option<Vec<u8>>, ReceiveError> {
        let leader = header_size + LEADER_FIELDS;
        if fragment.len() < leader {
            self.reset();
            return Err(ReceiveError::FragmentTooShort {
                len: fragment.len(),
                needed: leader,
            });
        }

        if self.buffer.is_none() {
            let offset = read_i32(fragment, header_size);
            let total = read_i32(fragment, header_size + 4);
            if total <= 0 || total as usize > MAX_PAYLOAD_SIZE {
                return Err(ReceiveError::InvalidTotalSize(total));
            }
            let total = total as usize;
            if offset < 0 || offset as usize >= total {
                return Err(ReceiveError::OffsetOutOfRange { offset, total });
            }
            self.buffer = Some(vec![0; total]);
            self.offset = offset as usize;
        }

        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(None);
        };
        let payload = &fragment[leader..];
        let take = payload.len().min(buffer.len() - self.offset);
        buffer[self.offset..self.offset + take].copy_from_slice(&payload[..take]);
        self.offset += take;

        if self.offset == buffer.len() {
            self.offset = 0;
            return Ok(self.buffer.take());
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.buffer = None;
        self.offset = 0;
    }
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Splits a serialized snapshot into fragments of at most `max_fragment_size` bytes.
///
/// The transport header region is zero-filled for the transport to stamp.
pub fn fragment_payload(
    payload: &[u8],
    header_size: usize,
    max_fragment_size: usize,
) -> Result<Vec<Vec<u8>>, ReceiveError> {
    let leader = header_size + LEADER_FIELDS;
    if max_fragment_size <= leader {
        return Err(ReceiveError::NoRoomForPayload {
            max: max_fragment_size,
            leader,
        });
    }
    if payload.is_empty() || payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ReceiveError::InvalidTotalSize(payload.len() as i32));
    }

    let total = payload.len() as i32;
    let per_fragment = max_fragment_size - leader;
    let fragments = payload
        .chunks(per_fragment)
        .enumerate()
        .map(|(i, part)| {
            let mut fragment = vec![0u8; header_size];
            fragment.reserve(LEADER_FIELDS + part.len());
            fragment.extend_from_slice(&((i * per_fragment) as i32).to_le_bytes());
            fragment.extend_from_slice(&total.to_le_bytes());
            fragment.extend_from_slice(part);
            fragment
        })
        .collect();
    Ok(fragments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: usize = 4;

    fn leader(offset: i32, total: i32) -> Vec<u8> {
        let mut bytes = vec![0xAA; HEADER];
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&total.to_le_bytes());
        bytes
    }

    #[test]
    fn test_three_fragments_assemble_in_order() {
        let payload: Vec<u8> = (0..30u8).collect();
        let fragments = fragment_payload(&payload, HEADER, HEADER + LEADER_FIELDS + 10).unwrap();
        assert_eq!(fragments.len(), 3);

        let mut receiver = ChunkReceiver::new();
        assert_eq!(receiver.receive(&fragments[0], HEADER).unwrap(), None);
        assert_eq!(receiver.progress(), Some((10, 30)));
        assert_eq!(receiver.receive(&fragments[1], HEADER).unwrap(), None);
        let assembled = receiver.receive(&fragments[2], HEADER).unwrap();
        assert_eq!(assembled, Some(payload));
        assert!(!receiver.is_receiving());
    }

    #[test]
    fn test_first_fragment_offset_is_respected() {
        let mut fragment = leader(2, 4);
        fragment.extend_from_slice(&[7, 8]);
        let mut receiver = ChunkReceiver::new();
        let assembled = receiver.receive(&fragment, HEADER).unwrap().unwrap();
        assert_eq!(assembled, vec![0, 0, 7, 8]);
    }

    #[test]
    fn test_excess_payload_is_ignored() {
        let mut fragment = leader(0, 3);
        fragment.extend_from_slice(&[1, 2, 3, 4, 5]);
        let mut receiver = ChunkReceiver::new();
        assert_eq!(
            receiver.receive(&fragment, HEADER).unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_short_fragment_rejected() {
        let mut receiver = ChunkReceiver::new();
        let err = receiver.receive(&[0; 5], HEADER).unwrap_err();
        assert_eq!(err, ReceiveError::FragmentTooShort { len: 5, needed: 12 });
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let mut receiver = ChunkReceiver::new();
        assert_eq!(
            receiver.receive(&leader(0, 0), HEADER),
            Err(ReceiveError::InvalidTotalSize(0))
        );
        assert_eq!(
            receiver.receive(&leader(0, i32::MAX), HEADER),
            Err(ReceiveError::InvalidTotalSize(i32::MAX))
        );
        assert_eq!(
            receiver.receive(&leader(8, 8), HEADER),
            Err(ReceiveError::OffsetOutOfRange {
                offset: 8,
                total: 8
            })
        );
        assert!(!receiver.is_receiving());
    }

    #[test]
    fn test_fragment_size_must_leave_room() {
        assert_eq!(
            fragment_payload(&[1, 2, 3], HEADER, HEADER + LEADER_FIELDS),
            Err(ReceiveError::NoRoomForPayload {
                max: 12,
                leader: 12
            })
        );
    }
}
