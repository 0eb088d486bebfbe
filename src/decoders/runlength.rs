//! RunLengthDecode implementation.
//!
//! Length byte 0-127 copies the next N+1 bytes literally; 129-255 repeats
//! the next byte 257-N times; 128 is the EOD marker.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// RunLengthDecode filter implementation.
pub struct RunLengthDecoder;

impl StreamDecoder for RunLengthDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let mut i = 0;

        while i < input.len() {
            let length = input[i];
            i += 1;

            match length {
                0..=127 => {
                    let count = length as usize + 1;
                    if i + count > input.len() {
                        return Err(Error::Decode(format!(
                            "RunLengthDecode: literal run needs {} bytes, {} left",
                            count,
                            input.len() - i
                        )));
                    }
                    output.extend_from_slice(&input[i..i + count]);
                    i += count;
                }
                128 => break,
                129..=255 => {
                    let count = 257 - length as usize;
                    let Some(&byte) = input.get(i) else {
                        return Err(Error::Decode(
                            "RunLengthDecode: missing byte for run".to_string(),
                        ));
                    };
                    i += 1;
                    output.resize(output.len() + count, byte);
                }
            }
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "RunLengthDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runlength_literal() {
        let input = vec![4, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(RunLengthDecoder.decode(&input).unwrap(), b"Hello");
    }

    #[test]
    fn test_runlength_run() {
        let input = vec![252, b'A'];
        assert_eq!(RunLengthDecoder.decode(&input).unwrap(), b"AAAAA");
    }

    #[test]
    fn test_runlength_mixed_with_eod() {
        let input = vec![1, b'a', b'b', 254, b'x', 128, b'!'];
        assert_eq!(RunLengthDecoder.decode(&input).unwrap(), b"abxxx");
    }

    #[test]
    fn test_runlength_truncated_literal() {
        assert!(RunLengthDecoder.decode(&[5, b'a']).is_err());
    }
}
