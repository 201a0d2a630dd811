//! MSB-first bit/byte packing (spec §6.4, normative).

/// Pack a bit list MSB-first into bytes. `byte = Σ bit_i · 2^(7-(i mod 8))`.
/// Trailing bits are zero-padded to a multiple of 8.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((bits.len() + 7) / 8);
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit != 0 {
                byte |= 1 << (7 - i);
            }
        }
        out.push(byte);
    }
    out
}

/// Inverse of [`bits_to_bytes`]: unpack bytes MSB-first into a bit list of
/// length `bytes.len() * 8`.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in 0..8 {
            out.push((byte >> (7 - i)) & 1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_exact_byte() {
        assert_eq!(bits_to_bytes(&[1, 0, 1, 0, 1, 0, 1, 0]), vec![0xAA]);
    }

    #[test]
    fn pads_trailing_zeros() {
        assert_eq!(bits_to_bytes(&[1, 1, 0, 0]), vec![0xC0]);
    }

    #[test]
    fn unpack_returns_zero_padded_bits() {
        assert_eq!(bytes_to_bits(&[0xC0]), vec![1, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn round_trip_modulo_padding() {
        let bits = vec![1u8, 0, 1, 0, 1, 0, 1, 0];
        let bytes = bits_to_bytes(&bits);
        assert_eq!(bytes_to_bits(&bytes), bits);
    }

    #[test]
    fn round_trip_with_padding_preserves_prefix() {
        let bits = vec![1u8, 1, 0, 0];
        let bytes = bits_to_bytes(&bits);
        let back = bytes_to_bits(&bytes);
        assert_eq!(&back[..bits.len()], &bits[..]);
        assert!(back[bits.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_input_packs_to_empty_output() {
        assert_eq!(bits_to_bytes(&[]), Vec::<u8>::new());
        assert_eq!(bytes_to_bits(&[]), Vec::<u8>::new());
    }
}
