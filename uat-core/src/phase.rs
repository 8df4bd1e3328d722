//! IQ sample conversion — raw sample blocks to instantaneous phase.
//!
//! Every downstream stage works on 16-bit phase values scaled so the full
//! circle maps onto [0, 65536). For the 8-bit formats a 65 536-entry lookup
//! table indexed by the packed (I << 8) | Q byte pair does the conversion;
//! the wider formats go through atan2 per sample. Loops are unrolled 8 ways
//! so the compiler can vectorize them.

use std::f64::consts::PI;
use std::str::FromStr;

use crate::types::UatError;

// ---------------------------------------------------------------------------
// Sample formats
// ---------------------------------------------------------------------------

/// Layout of a raw sample block:
///   CU8   - interleaved I/Q, 8 bit unsigned integers
///   CS8   - interleaved I/Q, 8 bit signed integers
///   CS16H - interleaved I/Q, 16 bit signed integers, host byte order
///   CF32H - interleaved I/Q, 64 bit floats, host byte order (legacy name)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Cu8,
    Cs8,
    Cs16H,
    Cf32H,
}

impl SampleFormat {
    /// Number of bytes carrying one I/Q sample in this format.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Cu8 | SampleFormat::Cs8 => 2,
            SampleFormat::Cs16H => 4,
            SampleFormat::Cf32H => 8,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = UatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CU8" => Ok(SampleFormat::Cu8),
            "CS8" => Ok(SampleFormat::Cs8),
            "CS16H" => Ok(SampleFormat::Cs16H),
            "CF32H" => Ok(SampleFormat::Cf32H),
            _ => Err(UatError::UnknownSampleFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SampleFormat::Cu8 => "CU8",
            SampleFormat::Cs8 => "CS8",
            SampleFormat::Cs16H => "CS16H",
            SampleFormat::Cf32H => "CF32H",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Phase math
// ---------------------------------------------------------------------------

/// Map an I/Q pair onto [0, 65535]: round(32768 * (atan2(q, i) + pi) / pi),
/// saturated at both ends.
pub fn scaled_atan2(q: f64, i: f64) -> u16 {
    let ang = q.atan2(i) + PI;
    let scaled = (32768.0 * ang / PI).round();
    if scaled < 0.0 {
        0
    } else if scaled > 65535.0 {
        65535
    } else {
        scaled as u16
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Converts raw sample blocks of one fixed format into phase values.
///
/// For CU8/CS8 the constructor precomputes the full 65 536-entry phase table;
/// conversion is then a table lookup per sample.
pub struct PhaseConverter {
    format: SampleFormat,
    lookup: Option<Vec<u16>>,
}

impl PhaseConverter {
    pub fn new(format: SampleFormat) -> Self {
        let lookup = match format {
            SampleFormat::Cu8 => Some(build_cu8_lookup()),
            SampleFormat::Cs8 => Some(build_cs8_lookup()),
            _ => None,
        };
        PhaseConverter { format, lookup }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Append one phase value per complete sample in `block` to `out`.
    /// Trailing partial samples are ignored, not buffered.
    pub fn convert(&self, block: &[u8], out: &mut Vec<u16>) {
        match self.format {
            SampleFormat::Cu8 | SampleFormat::Cs8 => {
                let lut = self.lookup.as_ref().unwrap();
                convert_lookup(lut, block, out);
            }
            SampleFormat::Cs16H => convert_cs16h(block, out),
            SampleFormat::Cf32H => convert_cf32h(block, out),
        }
    }
}

fn build_cu8_lookup() -> Vec<u16> {
    let mut lut = vec![0u16; 65536];
    for i in 0..256usize {
        let d_i = (i as f64 - 127.5) / 128.0;
        for q in 0..256usize {
            let d_q = (q as f64 - 127.5) / 128.0;
            lut[(i << 8) | q] = scaled_atan2(d_q, d_i);
        }
    }
    lut
}

fn build_cs8_lookup() -> Vec<u16> {
    let mut lut = vec![0u16; 65536];
    for i in 0..256usize {
        let d_i = (i as u8 as i8) as f64 / 128.0;
        for q in 0..256usize {
            let d_q = (q as u8 as i8) as f64 / 128.0;
            lut[(i << 8) | q] = scaled_atan2(d_q, d_i);
        }
    }
    lut
}

#[inline(always)]
fn lut_index(i: u8, q: u8) -> usize {
    ((i as usize) << 8) | q as usize
}

fn convert_lookup(lut: &[u16], block: &[u8], out: &mut Vec<u16>) {
    let n = block.len() / 2;
    out.reserve(n);

    // unroll the loop: 8 samples = 16 bytes per iteration
    let mut chunks = block.chunks_exact(16);
    for c in chunks.by_ref() {
        out.push(lut[lut_index(c[0], c[1])]);
        out.push(lut[lut_index(c[2], c[3])]);
        out.push(lut[lut_index(c[4], c[5])]);
        out.push(lut[lut_index(c[6], c[7])]);
        out.push(lut[lut_index(c[8], c[9])]);
        out.push(lut[lut_index(c[10], c[11])]);
        out.push(lut[lut_index(c[12], c[13])]);
        out.push(lut[lut_index(c[14], c[15])]);
    }
    for c in chunks.remainder().chunks_exact(2) {
        out.push(lut[lut_index(c[0], c[1])]);
    }
}

fn convert_cs16h(block: &[u8], out: &mut Vec<u16>) {
    out.reserve(block.len() / 4);
    for c in block.chunks_exact(4) {
        let i = i16::from_le_bytes([c[0], c[1]]);
        let q = i16::from_le_bytes([c[2], c[3]]);
        out.push(scaled_atan2(q as f64, i as f64));
    }
}

fn convert_cf32h(block: &[u8], out: &mut Vec<u16>) {
    out.reserve(block.len() / 16);
    for c in block.chunks_exact(16) {
        let i = f64::from_le_bytes(c[0..8].try_into().unwrap());
        let q = f64::from_le_bytes(c[8..16].try_into().unwrap());
        out.push(scaled_atan2(q, i));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
