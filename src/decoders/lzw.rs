//! LZWDecode implementation.
//!
//! PDF's LZW variant: MSB-first bit order, 9-bit initial codes, clear code
//! 256, EOD 257, and EarlyChange=1 (the code width grows one code earlier
//! than in GIF). weezl handles the stream; a partial result is salvaged when
//! the tail is corrupt.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use weezl::{decode::Decoder as WeezlDecoder, BitOrder};

/// LZWDecode filter implementation.
pub struct LzwDecoder;

impl StreamDecoder for LzwDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = WeezlDecoder::with_tiff_size_switch(BitOrder::Msb, 8);
        let mut output = Vec::new();
        let result = decoder.into_stream(&mut output).decode_all(input);
        match result.status {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!(
                    "LZWDecode partial recovery: {} bytes before error: {:?}",
                    output.len(),
                    e
                );
                Ok(output)
            }
            Err(e) => Err(Error::Decode(format!("LZWDecode failed: {:?}", e))),
        }
    }

    fn name(&self) -> &str {
        "LZWDecode"
    }
}
