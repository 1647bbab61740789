//! Wire format for frames embedded in the raw stream bytes.
//!
//! The recorder never parses this: it persists whatever bytes the upstream
//! image hands it, verbatim, because the frame headers are already embedded
//! by the transport before the bytes ever reach the archive. The cursor is
//! the one component that must understand framing, since replay has to
//! re-derive fragment boundaries, `flags` and `reservedValue` from what is
//! sitting on disk.

use crate::error::{ArchiveError, ArchiveResult};

/// Every frame (header + payload) is padded up to a multiple of this many
/// bytes, mirroring the transport's own frame alignment.
pub const FRAME_ALIGNMENT: i32 = 32;

/// Rounds `value` up to the next multiple of `alignment` (`alignment` must be
/// a power of two).
pub fn align_up(value: i32, alignment: i32) -> i32 {
    (value + alignment - 1) & !(alignment - 1)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameHeader {
    /// Unpadded length of header + payload; zero means "nothing written here yet".
    pub frame_length: i32,
    pub frame_type: i32,
    pub flags: u8,
    _pad: [u8; 3],
    pub term_offset: i32,
    pub term_id: i32,
    pub session_id: i32,
    pub reserved_value: i64,
}

pub const FRAME_HEADER_LENGTH: usize = std::mem::size_of::<FrameHeader>();

impl FrameHeader {
    /// Total on-disk footprint of this frame, aligned.
    pub fn padded_length(&self) -> i32 {
        align_up(self.frame_length, FRAME_ALIGNMENT)
    }
}

/// Encodes one frame (header + payload), padded to [`FRAME_ALIGNMENT`] with
/// zero bytes. Used by callers that feed blocks into a recorder: in
/// production that's the transport, in tests it plays the transport's role.
#[allow(clippy::too_many_arguments)]
pub fn encode_frame(
    term_id: i32,
    term_offset: i32,
    session_id: i32,
    frame_type: i32,
    flags: u8,
    reserved_value: i64,
    payload: &[u8],
) -> Vec<u8> {
    let frame_length = (FRAME_HEADER_LENGTH + payload.len()) as i32;
    let padded_length = align_up(frame_length, FRAME_ALIGNMENT) as usize;
    let mut buf = vec![0u8; padded_length];

    let header = FrameHeader {
        frame_length,
        frame_type,
        flags,
        _pad: [0; 3],
        term_offset,
        term_id,
        session_id,
        reserved_value,
    };
    buf[..FRAME_HEADER_LENGTH].copy_from_slice(bytemuck::bytes_of(&header));
    buf[FRAME_HEADER_LENGTH..FRAME_HEADER_LENGTH + payload.len()].copy_from_slice(payload);
    buf
}

/// Decodes a frame header from `bytes`, which must contain at least
/// [`FRAME_HEADER_LENGTH`] bytes at offset 0. Copies into an aligned local
/// buffer first since the slice may come from an arbitrary mmap offset.
pub fn decode_frame_header(bytes: &[u8]) -> ArchiveResult<FrameHeader> {
    if bytes.len() < FRAME_HEADER_LENGTH {
        return Err(ArchiveError::InvalidDescriptor(
            "short read decoding frame header".to_string(),
        ));
    }
    let mut header: FrameHeader = bytemuck::Zeroable::zeroed();
    bytemuck::bytes_of_mut(&mut header).copy_from_slice(&bytes[..FRAME_HEADER_LENGTH]);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(32, 32), 32);
        assert_eq!(align_up(33, 32), 64);
    }

    #[test]
    fn encode_then_decode_round_trips_header_fields() {
        let payload = b"hello fragment";
        let encoded = encode_frame(7, 0, 99, 1, 0b10, 4242, payload);
        assert_eq!(encoded.len() % FRAME_ALIGNMENT as usize, 0);

        let header = decode_frame_header(&encoded).unwrap();
        assert_eq!(header.term_id, 7);
        assert_eq!(header.term_offset, 0);
        assert_eq!(header.session_id, 99);
        assert_eq!(header.frame_type, 1);
        assert_eq!(header.flags, 0b10);
        assert_eq!(header.reserved_value, 4242);
        assert_eq!(header.frame_length as usize, FRAME_HEADER_LENGTH + payload.len());

        let data = &encoded[FRAME_HEADER_LENGTH..header.frame_length as usize];
        assert_eq!(data, payload);
    }

    #[test]
    fn zero_length_header_signals_end_of_data() {
        let zeroed = vec![0u8; FRAME_HEADER_LENGTH];
        let header = decode_frame_header(&zeroed).unwrap();
        assert_eq!(header.frame_length, 0);
    }
}
