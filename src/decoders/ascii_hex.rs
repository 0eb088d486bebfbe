//! ASCIIHexDecode implementation.
//!
//! Pairs of hex digits become bytes; whitespace is ignored, `>` ends the
//! data, and an odd final digit is padded with zero.

use crate::charclass::HEX_VALUE;
use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// ASCIIHexDecode filter implementation.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2);
        let mut hi: Option<u8> = None;

        for &b in input {
            if b == b'>' {
                break;
            }
            if b.is_ascii_whitespace() || b == 0 {
                continue;
            }
            let v = HEX_VALUE[b as usize];
            if v < 0 {
                return Err(Error::Decode(format!(
                    "ASCIIHexDecode: invalid character 0x{:02x}",
                    b
                )));
            }
            match hi.take() {
                None => hi = Some(v as u8),
                Some(h) => output.push((h << 4) | v as u8),
            }
        }
        if let Some(h) = hi {
            output.push(h << 4);
        }
        Ok(output)
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_decode() {
        assert_eq!(AsciiHexDecoder.decode(b"48656C6C6F>").unwrap(), b"Hello");
    }

    #[test]
    fn test_hex_decode_whitespace_and_odd() {
        assert_eq!(
            AsciiHexDecoder.decode(b"48 65 6C 6C 6F 7>").unwrap(),
            b"Hello\x70"
        );
    }

    #[test]
    fn test_hex_decode_invalid() {
        assert!(AsciiHexDecoder.decode(b"4G>").is_err());
    }
}
