//! BAM record decoding error types.
//!
//! Structured errors for record-level parsing and encoding:
//! - Precise error identification
//! - Pattern matching on specific error cases
//! - Offsets relative to the start of the record for debugging
//!
//! These surface to callers wrapped in [`BamError::MalformedRecord`](crate::BamError).

use std::{error, fmt};

/// Errors that can occur while decoding or encoding a BAM record.
///
/// # Example
///
/// ```
/// use bamcore::io::bam::error::DecodeError;
///
/// fn describe(err: &DecodeError) -> String {
///     match err {
///         DecodeError::InvalidReferenceId { value, field } => {
///             format!("bad {} reference: {}", field, value)
///         }
///         DecodeError::Truncated { context, .. } => format!("truncated {}", context),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Debug)]
pub enum DecodeError {
    /// Record ends before a field is complete
    Truncated {
        /// What was being parsed
        context: &'static str,
        /// Bytes needed
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Declared block size disagrees with the bytes supplied or consumed
    SizeMismatch {
        /// Size declared by block_size (+4 for the field itself)
        declared: usize,
        /// Size actually present or consumed
        actual: usize,
    },

    /// Negative block size, or one above `MAX_RECORD_SIZE`
    InvalidBlockSize {
        /// The raw value
        value: i32,
    },

    /// Reference ID must be -1 or a valid header index
    InvalidReferenceId {
        /// The invalid reference ID value
        value: i64,
        /// Which field had the invalid ID ("read" or "mate")
        field: &'static str,
    },

    /// Position below -1
    InvalidPosition {
        /// The invalid position value
        value: i32,
        /// Which field ("read" or "mate")
        field: &'static str,
    },

    /// Read name length must be in 1..=255 including the NUL
    InvalidReadNameLength {
        /// The invalid length
        length: usize,
    },

    /// Missing NUL terminator in string field
    MissingNulTerminator {
        /// Which field was missing the terminator
        field: &'static str,
        /// Offset in the record where the field starts
        offset: usize,
    },

    /// Invalid UTF-8 in string field
    InvalidUtf8 {
        /// Which field had invalid UTF-8
        field: &'static str,
        /// The underlying UTF-8 error
        source: std::string::FromUtf8Error,
    },

    /// Negative sequence length
    NegativeSequenceLength {
        /// The negative length value
        length: i32,
    },

    /// Odd-length sequence whose unused low nibble is not zero
    NonZeroSequencePadding {
        /// The padding nibble found
        nibble: u8,
    },

    /// Quality string present but not matching the sequence length
    QualityLengthMismatch {
        /// Sequence length
        sequence: usize,
        /// Quality length
        quality: usize,
    },

    /// CIGAR operation code outside 0..=8
    InvalidCigarOp {
        /// The invalid operation code
        code: u32,
    },

    /// CIGAR operation count does not fit in 16 bits
    CigarCountOverflow {
        /// The count value
        count: usize,
    },

    /// CIGAR operation length does not fit in 28 bits
    CigarLengthOverflow {
        /// The length value
        length: u32,
    },

    /// Tag value did not fit in the remaining record bytes
    TruncatedTag {
        /// The tag name
        tag: [u8; 2],
    },

    /// Field too large for its on-disk width
    FieldOverflow {
        /// Which field overflowed
        field: &'static str,
        /// The value that does not fit
        value: usize,
    },
}

impl error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::InvalidUtf8 { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated {
                context,
                expected,
                actual,
            } => write!(
                f,
                "Unexpected end of record while parsing {}: expected {} bytes, got {}",
                context, expected, actual
            ),

            Self::SizeMismatch { declared, actual } => write!(
                f,
                "Record size mismatch: block_size declares {} bytes, found {}",
                declared, actual
            ),

            Self::InvalidBlockSize { value } => write!(f, "Invalid block size: {}", value),

            Self::InvalidReferenceId { value, field } => write!(
                f,
                "Invalid {} reference ID: {} (must be -1 or a header reference)",
                field, value
            ),

            Self::InvalidPosition { value, field } => {
                write!(f, "Invalid {} position: {} (must be >= -1)", field, value)
            }

            Self::InvalidReadNameLength { length } => write!(
                f,
                "Invalid read name length: {} (must be 1..=255 including NUL)",
                length
            ),

            Self::MissingNulTerminator { field, offset } => {
                write!(f, "Missing NUL terminator in {} at offset {}", field, offset)
            }

            Self::InvalidUtf8 { field, source } => {
                write!(f, "Invalid UTF-8 in {}: {}", field, source)
            }

            Self::NegativeSequenceLength { length } => {
                write!(f, "Invalid negative sequence length: {}", length)
            }

            Self::NonZeroSequencePadding { nibble } => {
                write!(f, "Non-zero padding nibble in odd-length sequence: {:#x}", nibble)
            }

            Self::QualityLengthMismatch { sequence, quality } => write!(
                f,
                "Quality length {} does not match sequence length {}",
                quality, sequence
            ),

            Self::InvalidCigarOp { code } => write!(f, "Invalid CIGAR operation code: {}", code),

            Self::CigarCountOverflow { count } => {
                write!(f, "CIGAR operation count too large: {}", count)
            }

            Self::CigarLengthOverflow { length } => {
                write!(f, "CIGAR operation length too large: {}", length)
            }

            Self::TruncatedTag { tag } => write!(
                f,
                "Tag {}{} extends past the end of the record",
                tag[0] as char, tag[1] as char
            ),

            Self::FieldOverflow { field, value } => {
                write!(f, "Value {} does not fit in field {}", value, field)
            }
        }
    }
}
