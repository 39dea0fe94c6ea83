//! 4-bit BAM sequence encoding.
//!
//! BAM stores sequences in 4-bit encoding (2 bases per byte) to save space.
//! Each nibble (4 bits) encodes one base using a lookup table.
//!
//! # Format
//!
//! - High nibble first, low nibble second within each byte
//! - 16 possible values (4 bases + ambiguity codes)
//! - Example: byte 0x12 -> bases at indices 1 ('A') and 2 ('C')
//! - Odd-length sequences leave the final low nibble as zero padding

use super::error::DecodeError;

/// BAM 4-bit to ASCII base lookup table.
///
/// Encoding from SAM/BAM specification v1.6:
/// - 0 = '=' (match to reference, not used in practice)
/// - 1, 2, 4, 8 = A, C, G, T
/// - remaining values = IUPAC ambiguity codes (M, R, S, V, W, Y, H, K, D, B, N)
const SEQ_LOOKUP: [u8; 16] = [
    b'=', b'A', b'C', b'M', // 0-3
    b'G', b'R', b'S', b'V', // 4-7
    b'T', b'W', b'Y', b'H', // 8-11
    b'K', b'D', b'B', b'N', // 12-15
];

/// ASCII base to 4-bit code. Unknown characters map to N (15).
const fn build_code_table() -> [u8; 256] {
    let mut table = [15u8; 256];
    let mut i = 0;
    while i < 16 {
        let base = SEQ_LOOKUP[i];
        table[base as usize] = i as u8;
        table[base.to_ascii_lowercase() as usize] = i as u8;
        i += 1;
    }
    table
}

static CODE_LOOKUP: [u8; 256] = build_code_table();

/// Decode a 4-bit encoded BAM sequence to ASCII.
///
/// # Errors
///
/// - [`DecodeError::Truncated`] if `data` is shorter than `ceil(length / 2)`
/// - [`DecodeError::NonZeroSequencePadding`] if an odd-length sequence has a
///   non-zero trailing nibble (it could not be re-encoded byte-for-byte)
///
/// # Example
///
/// ```
/// use bamcore::io::bam::decode_sequence;
///
/// // Byte 0x12 encodes bases at indices 1 ('A') and 2 ('C')
/// let data = vec![0x12];
/// let sequence = decode_sequence(&data, 2).unwrap();
/// assert_eq!(sequence, b"AC");
/// ```
pub fn decode_sequence(data: &[u8], length: usize) -> Result<Vec<u8>, DecodeError> {
    let required_bytes = length.div_ceil(2);
    if data.len() < required_bytes {
        return Err(DecodeError::Truncated {
            context: "sequence",
            expected: required_bytes,
            actual: data.len(),
        });
    }

    let mut sequence = Vec::with_capacity(length);

    for &byte in &data[..length / 2] {
        sequence.push(SEQ_LOOKUP[(byte >> 4) as usize]);
        sequence.push(SEQ_LOOKUP[(byte & 0x0F) as usize]);
    }

    if length % 2 == 1 {
        let last = data[required_bytes - 1];
        if last & 0x0F != 0 {
            return Err(DecodeError::NonZeroSequencePadding {
                nibble: last & 0x0F,
            });
        }
        sequence.push(SEQ_LOOKUP[(last >> 4) as usize]);
    }

    Ok(sequence)
}

/// Encode ASCII bases into 4-bit BAM form, appending to `buf`.
///
/// Lowercase bases are accepted; characters outside `=ACMGRSVTWYHKDBN`
/// are stored as N.
///
/// # Example
///
/// ```
/// use bamcore::io::bam::sequence::encode_sequence;
///
/// let mut buf = Vec::new();
/// encode_sequence(b"ACGTA", &mut buf);
/// assert_eq!(buf, vec![0x12, 0x48, 0x10]);
/// ```
pub fn encode_sequence(bases: &[u8], buf: &mut Vec<u8>) {
    buf.reserve(bases.len().div_ceil(2));

    for pair in bases.chunks(2) {
        let high = CODE_LOOKUP[pair[0] as usize];
        let low = pair.get(1).map_or(0, |&b| CODE_LOOKUP[b as usize]);
        buf.push((high << 4) | low);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_single_base() {
        // 0x10 = high nibble 1 ('A'), low nibble 0 (padding)
        let data = vec![0x10];
        let seq = decode_sequence(&data, 1).unwrap();
        assert_eq!(seq, b"A");
    }

    #[test]
    fn test_decode_acgt() {
        let data = vec![0x12, 0x48];
        let seq = decode_sequence(&data, 4).unwrap();
        assert_eq!(seq, b"ACGT");
    }

    #[test]
    fn test_decode_odd_length() {
        // 0x12, 0x48, 0x10 = A, C, G, T, A
        let data = vec![0x12, 0x48, 0x10];
        let seq = decode_sequence(&data, 5).unwrap();
        assert_eq!(seq, b"ACGTA");
    }

    #[test]
    fn test_decode_ambiguity_codes() {
        let data = vec![0xFF];
        let seq = decode_sequence(&data, 2).unwrap();
        assert_eq!(seq, b"NN");
    }

    #[test]
    fn test_decode_empty_sequence() {
        let seq = decode_sequence(&[], 0).unwrap();
        assert_eq!(seq, b"");
    }

    #[test]
    fn test_insufficient_data_error() {
        let result = decode_sequence(&[0x12], 5);
        assert!(matches!(
            result,
            Err(DecodeError::Truncated { expected: 3, actual: 1, .. })
        ));
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        let result = decode_sequence(&[0x12, 0x4F], 3);
        assert!(matches!(
            result,
            Err(DecodeError::NonZeroSequencePadding { nibble: 0xF })
        ));
    }

    #[test]
    fn test_encode_lowercase_and_unknown() {
        let mut buf = Vec::new();
        encode_sequence(b"acgX", &mut buf);
        assert_eq!(buf, vec![0x12, 0x4F]);
    }

    #[test]
    fn test_all_lookup_values() {
        let expected = b"=ACMGRSVTWYHKDBN";
        assert_eq!(&SEQ_LOOKUP, expected);
        for (code, &base) in expected.iter().enumerate() {
            assert_eq!(CODE_LOOKUP[base as usize] as usize, code);
        }
    }

    proptest! {
        #[test]
        fn prop_sequence_roundtrip_all_bases(sequence in "[=ACMGRSVTWYHKDBN]{0,300}") {
            let bases = sequence.as_bytes();
            let mut encoded = Vec::new();
            encode_sequence(bases, &mut encoded);

            prop_assert_eq!(encoded.len(), bases.len().div_ceil(2));
            let decoded = decode_sequence(&encoded, bases.len()).unwrap();
            prop_assert_eq!(decoded, bases);
        }
    }
}
