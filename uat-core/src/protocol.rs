//! UAT framing constants shared by the demodulator, FEC, and message layers.
//!
//! Values are fixed by DO-282B: two complementary 36-bit sync words, two
//! downlink frame shapes, and a six-way block-interleaved uplink frame.

/// Length of the frame sync word, bits.
pub const SYNC_BITS: usize = 36;

/// Sync word preceding air-to-ground (downlink) frames.
pub const DOWNLINK_SYNC_WORD: u64 = 0xEAC_DDA_4E2;
/// Sync word preceding ground-to-air (uplink) frames. Bit complement of
/// the downlink word.
pub const UPLINK_SYNC_WORD: u64 = 0x153_225_B1D;

/// Basic UAT ADS-B frame: 18 data + 12 parity bytes.
pub const DOWNLINK_SHORT_DATA_BYTES: usize = 18;
pub const DOWNLINK_SHORT_BYTES: usize = 30;
pub const DOWNLINK_SHORT_BITS: usize = DOWNLINK_SHORT_BYTES * 8;

/// Long UAT ADS-B frame: 34 data + 14 parity bytes.
pub const DOWNLINK_LONG_DATA_BYTES: usize = 34;
pub const DOWNLINK_LONG_BYTES: usize = 48;
pub const DOWNLINK_LONG_BITS: usize = DOWNLINK_LONG_BYTES * 8;

/// Uplink frames interleave six RS blocks of 72 data + 20 parity bytes.
pub const UPLINK_BLOCKS_PER_FRAME: usize = 6;
pub const UPLINK_BLOCK_DATA_BYTES: usize = 72;
pub const UPLINK_BLOCK_BYTES: usize = 92;
pub const UPLINK_DATA_BYTES: usize = UPLINK_BLOCK_DATA_BYTES * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_BYTES: usize = UPLINK_BLOCK_BYTES * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_BITS: usize = UPLINK_BYTES * 8;

/// Galois field generator polynomial for both downlink and uplink RS codes.
pub const DOWNLINK_POLY: u32 = 0x187;
pub const UPLINK_POLY: u32 = 0x187;

/// The receiver samples at twice the 1.041666 MHz bit rate.
pub const SAMPLES_PER_SECOND: u64 = 2_083_333;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_words_are_complementary() {
        assert_eq!(DOWNLINK_SYNC_WORD ^ UPLINK_SYNC_WORD, (1u64 << SYNC_BITS) - 1);
    }

    #[test]
    fn test_frame_geometry() {
        assert_eq!(DOWNLINK_SHORT_BITS, 240);
        assert_eq!(DOWNLINK_LONG_BITS, 384);
        assert_eq!(UPLINK_BITS, 4416);
        assert_eq!(UPLINK_DATA_BYTES, 432);
    }
}
