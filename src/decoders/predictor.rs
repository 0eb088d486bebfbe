//! PNG and TIFF predictor reversal.
//!
//! Binary cross-reference streams are almost always Flate-compressed with a
//! PNG Up predictor; the predictor must be reversed after the main filter.

use crate::error::{Error, Result};

/// Decode parameters (`/DecodeParms`) for stream decoders.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Number of columns (width in samples)
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse the predictor named in `params` over `data`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(data, params),
        p => Err(Error::Decode(format!("unsupported predictor {}", p))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row = params.pixel_bytes_per_row();
    if row == 0 || data.len() % row != 0 {
        return Err(Error::Decode(format!(
            "predictor row size {} does not divide data length {}",
            row,
            data.len()
        )));
    }
    let colors = params.colors.max(1);
    let mut output = Vec::with_capacity(data.len());
    for chunk in data.chunks(row) {
        for (i, &b) in chunk.iter().enumerate() {
            if i < colors {
                output.push(b);
            } else {
                let left = output[output.len() - colors];
                output.push(b.wrapping_add(left));
            }
        }
    }
    Ok(output)
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let pixel_row = params.pixel_bytes_per_row();
    let row = pixel_row + 1; // leading per-row filter tag
    if pixel_row == 0 || data.len() % row != 0 {
        return Err(Error::Decode(format!(
            "predictor row size {} does not divide data length {}",
            row,
            data.len()
        )));
    }
    let bpp = params.bytes_per_pixel();
    let mut output: Vec<u8> = Vec::with_capacity(data.len() / row * pixel_row);
    let mut prev_row = vec![0u8; pixel_row];

    for chunk in data.chunks(row) {
        let filter = chunk[0];
        let src = &chunk[1..];
        let mut decoded = vec![0u8; pixel_row];
        for i in 0..pixel_row {
            let raw = src[i];
            let left = if i >= bpp { decoded[i - bpp] } else { 0 };
            let up = prev_row[i];
            let up_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            decoded[i] = match filter {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                f => {
                    return Err(Error::Decode(format!("unknown PNG row filter {}", f)));
                }
            };
        }
        output.extend_from_slice(&decoded);
        prev_row = decoded;
    }
    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
