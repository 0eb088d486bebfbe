//! ASCII85Decode (Base85) implementation.
//!
//! Four bytes are represented as five characters in `!`..`u`; `z` stands for
//! four zero bytes and `~>` ends the data.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// ASCII85Decode filter implementation.
pub struct Ascii85Decoder;

impl StreamDecoder for Ascii85Decoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let mut acc: u32 = 0;
        let mut count = 0;

        for &byte in input {
            match byte {
                b'~' => break,
                b'z' => {
                    if count != 0 {
                        return Err(Error::Decode(
                            "ASCII85Decode: 'z' inside a group".to_string(),
                        ));
                    }
                    output.extend_from_slice(&[0, 0, 0, 0]);
                }
                b'!'..=b'u' => {
                    acc = acc
                        .checked_mul(85)
                        .and_then(|v| v.checked_add((byte - b'!') as u32))
                        .ok_or_else(|| {
                            Error::Decode("ASCII85Decode: group overflow".to_string())
                        })?;
                    count += 1;
                    if count == 5 {
                        output.extend_from_slice(&acc.to_be_bytes());
                        acc = 0;
                        count = 0;
                    }
                }
                _ if byte.is_ascii_whitespace() => {}
                _ => {
                    return Err(Error::Decode(format!(
                        "ASCII85Decode: invalid character 0x{:02x}",
                        byte
                    )));
                }
            }
        }

        if count > 0 {
            if count == 1 {
                return Err(Error::Decode(
                    "ASCII85Decode: single trailing character".to_string(),
                ));
            }
            for _ in count..5 {
                acc = acc
                    .checked_mul(85)
                    .and_then(|v| v.checked_add(84))
                    .ok_or_else(|| {
                        Error::Decode("ASCII85Decode: padding overflow".to_string())
                    })?;
            }
            let bytes = acc.to_be_bytes();
            output.extend_from_slice(&bytes[..count - 1]);
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "ASCII85Decode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii85_full_group() {
        assert_eq!(Ascii85Decoder.decode(b"<+U,m").unwrap(), b"Test");
    }

    #[test]
    fn test_ascii85_z_shortcut() {
        assert_eq!(Ascii85Decoder.decode(b"z").unwrap(), b"\0\0\0\0");
    }

    #[test]
    fn test_ascii85_partial_group_with_eod() {
        // two plain bytes arrive as a three-character partial group
        let decoded = Ascii85Decoder.decode(b"87_~>").unwrap();
        assert_eq!(decoded, b"He");
    }

    #[test]
    fn test_ascii85_invalid_character() {
        assert!(Ascii85Decoder.decode(b"<+U,\x7f").is_err());
    }
}
