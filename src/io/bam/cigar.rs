//! CIGAR (Compact Idiosyncratic Gapped Alignment Report) parsing.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, CIGAR is stored as 32-bit integers:
//! - Low 4 bits: operation type (0-8)
//! - High 28 bits: operation length (0 to 268,435,455)
//!
//! # Operations
//!
//! | Code | Op | Consumes query | Consumes reference |
//! |------|----|----------------|--------------------|
//! | 0    | M  | yes            | yes                |
//! | 1    | I  | yes            | no                 |
//! | 2    | D  | no             | yes                |
//! | 3    | N  | no             | yes                |
//! | 4    | S  | yes            | no                 |
//! | 5    | H  | no             | no                 |
//! | 6    | P  | no             | no                 |
//! | 7    | =  | yes            | yes                |
//! | 8    | X  | yes            | yes                |

use super::error::DecodeError;

/// Largest length representable in the 28-bit length field.
pub const MAX_OP_LENGTH: u32 = (1 << 28) - 1;

/// CIGAR operation types.
///
/// Each operation describes a type of alignment event and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// Match or mismatch (M)
    Match(u32),
    /// Insertion to reference (I)
    Insertion(u32),
    /// Deletion from reference (D)
    Deletion(u32),
    /// Skipped region from reference (N)
    RefSkip(u32),
    /// Soft clipping (S)
    SoftClip(u32),
    /// Hard clipping (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
}

impl CigarOp {
    /// Build an operation from its BAM op code (0-8) and length.
    ///
    /// Returns `None` for codes 9-15.
    pub fn from_code(code: u32, length: u32) -> Option<Self> {
        let op = match code {
            0 => CigarOp::Match(length),
            1 => CigarOp::Insertion(length),
            2 => CigarOp::Deletion(length),
            3 => CigarOp::RefSkip(length),
            4 => CigarOp::SoftClip(length),
            5 => CigarOp::HardClip(length),
            6 => CigarOp::Padding(length),
            7 => CigarOp::SeqMatch(length),
            8 => CigarOp::SeqMismatch(length),
            _ => return None,
        };
        Some(op)
    }

    /// Unpack a raw 32-bit BAM CIGAR value.
    pub fn from_packed(packed: u32) -> Result<Self, DecodeError> {
        let code = packed & 0x0F;
        Self::from_code(code, packed >> 4).ok_or(DecodeError::InvalidCigarOp { code })
    }

    /// BAM op code (0-8).
    pub fn code(&self) -> u32 {
        match self {
            CigarOp::Match(_) => 0,
            CigarOp::Insertion(_) => 1,
            CigarOp::Deletion(_) => 2,
            CigarOp::RefSkip(_) => 3,
            CigarOp::SoftClip(_) => 4,
            CigarOp::HardClip(_) => 5,
            CigarOp::Padding(_) => 6,
            CigarOp::SeqMatch(_) => 7,
            CigarOp::SeqMismatch(_) => 8,
        }
    }

    /// Pack into the 32-bit BAM representation.
    pub fn to_packed(&self) -> Result<u32, DecodeError> {
        let length = self.length();
        if length > MAX_OP_LENGTH {
            return Err(DecodeError::CigarLengthOverflow { length });
        }
        Ok((length << 4) | self.code())
    }

    /// Get the operation count/length.
    pub fn length(&self) -> u32 {
        match *self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len) => len,
        }
    }

    /// Check if this operation has zero length.
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Get the operation type as a character (for SAM format).
    pub fn as_char(&self) -> char {
        match self {
            CigarOp::Match(_) => 'M',
            CigarOp::Insertion(_) => 'I',
            CigarOp::Deletion(_) => 'D',
            CigarOp::RefSkip(_) => 'N',
            CigarOp::SoftClip(_) => 'S',
            CigarOp::HardClip(_) => 'H',
            CigarOp::Padding(_) => 'P',
            CigarOp::SeqMatch(_) => '=',
            CigarOp::SeqMismatch(_) => 'X',
        }
    }

    /// True for M, D, N, =, X.
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Deletion(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// True for M, I, S, =, X.
    pub fn consumes_query(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Insertion(_)
                | CigarOp::SoftClip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// True for M, =, X.
    pub fn consumes_both(&self) -> bool {
        self.consumes_reference() && self.consumes_query()
    }

    /// Bases of reference covered by this operation.
    pub fn reference_length(&self) -> u32 {
        if self.consumes_reference() {
            self.length()
        } else {
            0
        }
    }
}

impl std::fmt::Display for CigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Number of reference bases spanned by a CIGAR.
pub fn reference_length(cigar: &[CigarOp]) -> u64 {
    cigar.iter().map(|op| op.reference_length() as u64).sum()
}

/// Number of query bases consumed by a CIGAR.
pub fn query_length(cigar: &[CigarOp]) -> u64 {
    cigar
        .iter()
        .filter(|op| op.consumes_query())
        .map(|op| op.length() as u64)
        .sum()
}

/// Render a CIGAR as SAM text (`*` when empty).
pub fn cigar_to_string(cigar: &[CigarOp]) -> String {
    if cigar.is_empty() {
        return String::from("*");
    }
    cigar.iter().map(|op| op.to_string()).collect()
}

/// Parse BAM CIGAR operations from binary format.
///
/// Each CIGAR operation is encoded as a 32-bit little-endian integer:
/// - Bits 0-3: operation type (0-8)
/// - Bits 4-31: operation length
///
/// # Errors
///
/// - [`DecodeError::Truncated`] if `data` holds fewer than `n_ops * 4` bytes
/// - [`DecodeError::InvalidCigarOp`] for op codes 9-15
///
/// # Example
///
/// ```
/// use bamcore::io::bam::{parse_cigar, CigarOp};
///
/// // 100M = 100 << 4 | 0 = 1600 = 0x00000640 (little-endian)
/// let data = vec![0x40, 0x06, 0x00, 0x00];
/// let cigar = parse_cigar(&data, 1).unwrap();
/// assert_eq!(cigar, vec![CigarOp::Match(100)]);
/// ```
pub fn parse_cigar(data: &[u8], n_ops: usize) -> Result<Vec<CigarOp>, DecodeError> {
    let required_bytes = n_ops * 4;
    if data.len() < required_bytes {
        return Err(DecodeError::Truncated {
            context: "CIGAR",
            expected: required_bytes,
            actual: data.len(),
        });
    }

    data[..required_bytes]
        .chunks_exact(4)
        .map(|raw| CigarOp::from_packed(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
        .collect()
}

/// Append CIGAR operations in BAM binary form to `buf`.
pub fn encode_cigar(cigar: &[CigarOp], buf: &mut Vec<u8>) -> Result<(), DecodeError> {
    buf.reserve(cigar.len() * 4);
    for op in cigar {
        buf.extend_from_slice(&op.to_packed()?.to_le_bytes());
    }
    Ok(())
}
