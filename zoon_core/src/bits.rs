//! Bit-literal encoding helpers.
//!
//! A bit-literal is a string over `{0,1}` whose length is a multiple of 8.
//! Each group of eight characters is one byte, most significant bit first.

use crate::error::{Result, ZoonError};

const BITS_PER_BYTE: usize = 8;

/// Packs a bit-literal into bytes.
///
/// `"0110000111111111"` becomes `[0x61, 0xFF]`. The empty string is valid and
/// yields no bytes.
pub fn to_bytes(literal: &str) -> Result<Vec<u8>> {
    if let Some(bad) = literal.chars().find(|c| *c != '0' && *c != '1') {
        return Err(ZoonError::InvalidArgument(format!(
            "bit-literal may only contain '0' and '1', found {bad:?}"
        )));
    }
    if literal.len() % BITS_PER_BYTE != 0 {
        return Err(ZoonError::InvalidArgument(format!(
            "bit-literal length {} is not a multiple of {BITS_PER_BYTE}",
            literal.len()
        )));
    }

    Ok(literal
        .as_bytes()
        .chunks(BITS_PER_BYTE)
        .map(|group| {
            group
                .iter()
                .fold(0u8, |acc, digit| (acc << 1) | (digit - b'0'))
        })
        .collect())
}

/// Renders bytes as a bit-literal, the inverse of [`to_bytes`].
pub fn to_bits(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:08b}")).collect()
}

/// Flips bit `bit` of `byte`, where bit 0 is the least significant.
pub fn toggle_bit_in_byte(bit: u32, byte: u8) -> u8 {
    byte ^ (1u8 << bit)
}

/// Splits a bit position into `(byte index, mask)`.
///
/// Bits are addressed from the most significant end of each byte, so
/// position 0 is weight `0x80` of byte 0 and position 7 is weight `0x01`.
pub fn locate(position: usize) -> (usize, u32) {
    let byte = position / BITS_PER_BYTE;
    let bit = (BITS_PER_BYTE - 1 - position % BITS_PER_BYTE) as u32;
    (byte, bit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_packs_msb_first() {
        assert_eq!(to_bytes("01100001").unwrap(), vec![0x61]);
        assert_eq!(to_bytes("1000000000000001").unwrap(), vec![0x80, 0x01]);
        assert!(to_bytes("").unwrap().is_empty());
    }

    #[test]
    fn to_bytes_rejects_bad_alphabet() {
        let err = to_bytes("0110002a").unwrap_err();
        assert!(
            matches!(err, ZoonError::InvalidArgument(ref msg) if msg.contains("'2'")),
            "Unexpected error: {err:?}"
        );
    }

    #[test]
    fn to_bytes_rejects_partial_byte() {
        let err = to_bytes("0110").unwrap_err();
        assert!(
            matches!(err, ZoonError::InvalidArgument(ref msg) if msg.contains("multiple of 8")),
            "Unexpected error: {err:?}"
        );
    }

    #[test]
    fn bit_literal_round_trips() {
        for literal in ["", "00000000", "11111111", "0110000110100101", "1000000001111111"] {
            assert_eq!(to_bits(&to_bytes(literal).unwrap()), literal);
        }
    }

    #[test]
    fn locate_addresses_from_most_significant_bit() {
        assert_eq!(locate(0), (0, 7));
        assert_eq!(locate(7), (0, 0));
        assert_eq!(locate(8), (1, 7));
        assert_eq!(locate(21), (2, 2));
    }

    #[test]
    fn toggle_is_an_involution() {
        let byte = 0x61;
        let flipped = toggle_bit_in_byte(7, byte);
        assert_eq!(flipped, 0xE1);
        assert_eq!(toggle_bit_in_byte(7, flipped), byte);
    }
}
