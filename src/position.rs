//! Position arithmetic: mapping between `(termId, termOffset)`, the
//! monotonic stream position, and `(segmentIndex, segmentOffset)` within a
//! recording's segment files.

use crate::error::{ArchiveError, ArchiveResult};

/// Returns true iff `n` is a power of two (and non-zero).
pub fn is_power_of_two(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Stream position of a frame at `(termId, termOffset)`.
///
/// `position = (termId - initialTermId) * termBufferLength + termOffset`.
pub fn compute_position(term_id: i32, term_offset: i32, initial_term_id: i32, term_buffer_length: i32) -> u64 {
    let term_delta = (term_id - initial_term_id) as i64;
    (term_delta * term_buffer_length as i64 + term_offset as i64) as u64
}

/// Fixed geometry for one recording: term/segment sizing used to derive
/// segment-local offsets by mask and shift instead of division on the hot
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub term_buffer_length: i32,
    pub segment_file_length: i64,
    pub initial_term_id: i32,
    terms_per_segment: i64,
    terms_mask: i64,
}

impl Geometry {
    /// Validate and construct geometry for a recording.
    ///
    /// `segmentFileLength` must be a positive multiple of `termBufferLength`,
    /// and `segmentFileLength / termBufferLength` must be a power of two.
    pub fn new(term_buffer_length: i32, segment_file_length: i64, initial_term_id: i32) -> ArchiveResult<Self> {
        if term_buffer_length <= 0 || !is_power_of_two(term_buffer_length as u64) {
            return Err(ArchiveError::InvalidConfig(format!(
                "termBufferLength must be a positive power of two, got {term_buffer_length}"
            )));
        }
        if segment_file_length <= 0 || segment_file_length % term_buffer_length as i64 != 0 {
            return Err(ArchiveError::InvalidConfig(format!(
                "segmentFileLength ({segment_file_length}) must be a positive multiple of termBufferLength ({term_buffer_length})"
            )));
        }
        let terms_per_segment = segment_file_length / term_buffer_length as i64;
        if !is_power_of_two(terms_per_segment as u64) {
            return Err(ArchiveError::InvalidConfig(format!(
                "segmentFileLength / termBufferLength ({terms_per_segment}) must be a power of two"
            )));
        }
        Ok(Self {
            term_buffer_length,
            segment_file_length,
            initial_term_id,
            terms_per_segment,
            terms_mask: terms_per_segment - 1,
        })
    }

    pub fn terms_per_segment(&self) -> i64 {
        self.terms_per_segment
    }

    /// `position = (termId - initialTermId) * L + termOffset`.
    pub fn position(&self, term_id: i32, term_offset: i32) -> u64 {
        compute_position(term_id, term_offset, self.initial_term_id, self.term_buffer_length)
    }

    /// Maps `(termId, termOffset)` to `(segmentIndex, segmentOffset)`.
    ///
    /// `termInSegment = (termId - initialTermId) & termsMask`
    /// `segmentOffset = termInSegment * termBufferLength + termOffset`
    /// `segmentIndex = (termId - initialTermId) / termsPerSegment`
    pub fn segment_location(&self, term_id: i32, term_offset: i32) -> (u64, u64) {
        let term_delta = (term_id - self.initial_term_id) as i64;
        let term_in_segment = term_delta & self.terms_mask;
        let segment_offset = term_in_segment * self.term_buffer_length as i64 + term_offset as i64;
        let segment_index = term_delta.div_euclid(self.terms_per_segment);
        (segment_index as u64, segment_offset as u64)
    }

    /// Stream position corresponding to `(segmentIndex, segmentOffset)`, given
    /// the recording's `initialPosition` and the alignment of the first
    /// segment the recording's initial position falls in.
    ///
    /// Used by the cursor to derive its starting segment for an arbitrary
    /// `fromPosition`, honouring a non-segment-aligned `initialPosition`
    /// (see design notes on replay segment indexing).
    pub fn segment_index_for_position(&self, position: u64, initial_position: u64) -> (u64, u64) {
        let first_segment_offset = initial_position % self.segment_file_length as u64;
        let absolute = position - initial_position + first_segment_offset;
        let segment_index = absolute / self.segment_file_length as u64;
        let segment_offset = absolute % self.segment_file_length as u64;
        (segment_index, segment_offset)
    }
}
