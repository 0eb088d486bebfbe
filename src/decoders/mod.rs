//! Stream decoder implementations for PDF filters.
//!
//! Decoders for the filters a mutation pass must understand to decode
//! streams in place:
//! - FlateDecode (zlib/deflate) - most common
//! - ASCIIHexDecode - hexadecimal encoding
//! - ASCII85Decode - base85 encoding
//! - LZWDecode - LZW compression
//! - RunLengthDecode - run-length encoding
//!
//! Decoders can be chained in a filter pipeline; PNG/TIFF predictors are
//! applied after the main filters (binary xref streams use them heavily).
//! [`StreamFilter`] adapts a pipeline to the scanner's incremental
//! `read_stream` / `read_stream_next` interface.

use crate::error::{Error, Result};

mod ascii85;
mod ascii_hex;
mod flate;
mod lzw;
mod predictor;
mod runlength;

pub use ascii85::Ascii85Decoder;
pub use ascii_hex::AsciiHexDecoder;
pub use flate::FlateDecoder;
pub use lzw::LzwDecoder;
pub use predictor::{decode_predictor, DecodeParams};
pub use runlength::RunLengthDecoder;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// The filter's PDF name (e.g. "FlateDecode").
    fn name(&self) -> &str;
}

/// Resolve a filter name to its decoder.
fn decoder_for(name: &str) -> Result<Box<dyn StreamDecoder>> {
    match name {
        "FlateDecode" | "Fl" => Ok(Box::new(FlateDecoder)),
        "ASCIIHexDecode" | "AHx" => Ok(Box::new(AsciiHexDecoder)),
        "ASCII85Decode" | "A85" => Ok(Box::new(Ascii85Decoder)),
        "LZWDecode" | "LZW" => Ok(Box::new(LzwDecoder)),
        "RunLengthDecode" | "RL" => Ok(Box::new(RunLengthDecoder)),
        _ => Err(Error::Unsupported(format!("filter {}", name))),
    }
}

/// Decode stream data through a filter pipeline.
///
/// Filters are applied in order; a predictor, when given, is reversed after
/// the final filter.
pub fn decode_chain(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder = decoder_for(filter_name)?;
        current = decoder.decode(&current)?;
    }

    if let Some(params) = params {
        if params.predictor != 1 {
            current = decode_predictor(&current, params)?;
        }
    }

    Ok(current)
}

/// Incremental view of a decoding pipeline, as attached to a scanner for raw
/// stream reads. `begin` consumes the raw bytes; the decoded bytes drain
/// through `begin`'s destination and any number of `proceed` calls.
pub trait StreamFilter {
    /// Feed the raw input and fill `out` with the first decoded bytes.
    /// A return value equal to `out.len()` means more data is pending.
    fn begin(&mut self, input: &[u8], out: &mut [u8]) -> Result<usize>;

    /// Continue draining decoded bytes.
    fn proceed(&mut self, out: &mut [u8]) -> Result<usize>;
}

/// A [`StreamFilter`] over a named filter chain.
pub struct PipelineFilter {
    filters: Vec<String>,
    params: Option<DecodeParams>,
    decoded: Vec<u8>,
    drained: usize,
}

impl PipelineFilter {
    /// Create a filter over the given chain.
    pub fn new(filters: Vec<String>, params: Option<DecodeParams>) -> Self {
        PipelineFilter {
            filters,
            params,
            decoded: Vec::new(),
            drained: 0,
        }
    }

    fn drain(&mut self, out: &mut [u8]) -> usize {
        let pending = &self.decoded[self.drained..];
        let n = pending.len().min(out.len());
        out[..n].copy_from_slice(&pending[..n]);
        self.drained += n;
        n
    }
}

impl StreamFilter for PipelineFilter {
    fn begin(&mut self, input: &[u8], out: &mut [u8]) -> Result<usize> {
        self.decoded = decode_chain(input, &self.filters, self.params.as_ref())?;
        self.drained = 0;
        Ok(self.drain(out))
    }

    fn proceed(&mut self, out: &mut [u8]) -> Result<usize> {
        Ok(self.drain(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chain_no_filters() {
        let data = b"Hello, World!";
        let result = decode_chain(data, &[], None).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_decode_chain_unknown_filter() {
        let result = decode_chain(b"x", &["NoSuchFilter".to_string()], None);
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_decode_chain_hex() {
        let result =
            decode_chain(b"48656C6C6F>", &["ASCIIHexDecode".to_string()], None).unwrap();
        assert_eq!(result, b"Hello");
    }

    #[test]
    fn test_pipeline_filter_drains_incrementally() {
        let mut filter =
            PipelineFilter::new(vec!["ASCIIHexDecode".to_string()], None);
        let mut out = [0u8; 2];
        let n = filter.begin(b"48656C6C6F>", &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&out[..n], b"He");

        let mut rest = [0u8; 8];
        let n = filter.proceed(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"llo");
        assert_eq!(filter.proceed(&mut rest).unwrap(), 0);
    }
}
