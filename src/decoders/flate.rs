//! FlateDecode (zlib/deflate) implementation.
//!
//! The most common PDF compression filter. Uses the flate2 crate; a raw
//! deflate pass is tried when the zlib wrapper is corrupt.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) => {
                if !output.is_empty() {
                    // salvage whatever inflated before the corruption
                    log::warn!(
                        "FlateDecode partial recovery: {} bytes before error: {}",
                        output.len(),
                        e
                    );
                    return Ok(output);
                }

                // some writers emit raw deflate without the zlib wrapper
                output.clear();
                match DeflateDecoder::new(input).read_to_end(&mut output) {
                    Ok(_) => Ok(output),
                    Err(_) if !output.is_empty() => {
                        log::warn!(
                            "FlateDecode raw-deflate partial recovery: {} bytes",
                            output.len()
                        );
                        Ok(output)
                    }
                    Err(_) => Err(Error::Decode(format!("FlateDecode failed: {}", e))),
                }
            }
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

/// Compress data with zlib (used when rebuilding object stream containers).
pub fn flate_encode(input: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // writing into a Vec cannot fail
    encoder.write_all(input).expect("in-memory write");
    encoder.finish().expect("in-memory finish")
}
