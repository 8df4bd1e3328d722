//! Phase-buffer demodulation — locate sync words and slice UAT frames.
//!
//! The receiver samples at twice the bit rate, so each transmitted bit is
//! the sign of the phase difference between one pair of adjacent samples.
//! Two 36-bit shift registers track the candidate bit streams at the two
//! possible pair alignments; when either matches a sync word within 4 bit
//! errors, the frame is sliced with a threshold recovered from the sync
//! word itself, dithered by half a sample, and gated through the FEC.

use crate::fec::Fec;
use crate::message::RawMessage;
use crate::protocol::*;

// ---------------------------------------------------------------------------
// Phase difference
// ---------------------------------------------------------------------------

/// Signed phase change `to - from`, reduced modulo 65536 into
/// (-32768, +32767]. Positive means counter-clockwise rotation.
#[inline]
pub fn phase_difference(from: u16, to: u16) -> i16 {
    let difference = to as i32 - from as i32; // -65535 .. +65535
    if difference >= 32768 {
        (difference - 65536) as i16
    } else if difference < -32768 {
        (difference + 65536) as i16
    } else {
        difference as i16
    }
}

// ---------------------------------------------------------------------------
// Sync word matching
// ---------------------------------------------------------------------------

/// True if `word` is within 4 bits of `expected`.
///
/// Early-exit popcount: `x &= x - 1` clears the lowest set bit, so we can
/// stop as soon as a fifth set bit is seen.
#[inline]
pub fn sync_word_match(word: u64, expected: u64) -> bool {
    let mut diff = word ^ expected;
    if diff == 0 {
        return true;
    }

    diff &= diff - 1;
    if diff == 0 {
        return true; // 1 bit error
    }
    diff &= diff - 1;
    if diff == 0 {
        return true; // 2 bits
    }
    diff &= diff - 1;
    if diff == 0 {
        return true; // 3 bits
    }
    diff &= diff - 1;
    diff == 0 // 4 bits, else give up
}

const MAX_SYNC_ERRORS: usize = 4;

/// Re-verify a sync word at `start` and derive the bit-slicing threshold.
///
/// The threshold is the midpoint between the mean phase difference of the
/// pattern's one bits and of its zero bits. Returns None when the sync word
/// re-read with that threshold has more than 4 bit errors.
fn check_sync_word(phase: &[u16], start: usize, pattern: u64) -> Option<i16> {
    let mut dphi_zero_total: i32 = 0;
    let mut zero_bits: i32 = 0;
    let mut dphi_one_total: i32 = 0;
    let mut one_bits: i32 = 0;

    for i in 0..SYNC_BITS {
        let dphi = phase_difference(phase[start + i * 2], phase[start + i * 2 + 1]) as i32;
        if pattern & (1u64 << (35 - i)) != 0 {
            one_bits += 1;
            dphi_one_total += dphi;
        } else {
            zero_bits += 1;
            dphi_zero_total += dphi;
        }
    }

    dphi_zero_total /= zero_bits;
    dphi_one_total /= one_bits;

    let center = ((dphi_one_total + dphi_zero_total) / 2) as i16;

    let mut error_bits = 0;
    for i in 0..SYNC_BITS {
        let dphi = phase_difference(phase[start + i * 2], phase[start + i * 2 + 1]);
        if pattern & (1u64 << (35 - i)) != 0 {
            if dphi < center {
                error_bits += 1;
            }
        } else if dphi > center {
            error_bits += 1;
        }
    }

    (error_bits <= MAX_SYNC_ERRORS).then_some(center)
}

/// Slice `nbytes` bytes of payload starting at sample `start`, one bit per
/// sample pair, using `center` as the slicing threshold.
fn demod_bits(phase: &[u16], start: usize, nbytes: usize, center: i16) -> Vec<u8> {
    // the scan loop's trailing margin guarantees this
    assert!(
        start + nbytes * 8 * 2 < phase.len(),
        "bit slice would overrun phase buffer"
    );

    let mut result = Vec::with_capacity(nbytes);
    let mut p = &phase[start..];
    for _ in 0..nbytes {
        let mut b = 0u8;
        if phase_difference(p[0], p[1]) > center {
            b |= 0x80;
        }
        if phase_difference(p[2], p[3]) > center {
            b |= 0x40;
        }
        if phase_difference(p[4], p[5]) > center {
            b |= 0x20;
        }
        if phase_difference(p[6], p[7]) > center {
            b |= 0x10;
        }
        if phase_difference(p[8], p[9]) > center {
            b |= 0x08;
        }
        if phase_difference(p[10], p[11]) > center {
            b |= 0x04;
        }
        if phase_difference(p[12], p[13]) > center {
            b |= 0x02;
        }
        if phase_difference(p[14], p[15]) > center {
            b |= 0x01;
        }
        result.push(b);
        p = &p[16..];
    }

    result
}

// ---------------------------------------------------------------------------
// Demodulator
// ---------------------------------------------------------------------------

/// Sync-word driven frame extractor. Stateless across buffers: the caller
/// re-presents the trailing samples of each block in the next one.
pub struct Demodulator {
    fec: Fec,
}

impl Demodulator {
    pub fn new() -> Self {
        Demodulator { fec: Fec::new() }
    }

    /// Number of samples the caller must carry over between buffers so that
    /// a frame starting near the end of one block is seen in full in the next.
    pub fn num_trailing_samples(&self) -> usize {
        (SYNC_BITS + UPLINK_BITS) * 2
    }

    /// Scan `phase` for frames. `timestamp` is the capture time of sample 0
    /// in milliseconds since the Unix epoch; frames starting within the
    /// final trailing-samples window are left for the next buffer.
    pub fn demodulate(&self, timestamp: u64, phase: &[u16]) -> Vec<RawMessage> {
        let mut messages = Vec::new();

        let trailing_samples = (SYNC_BITS + UPLINK_BITS) * 2 - 2;
        if phase.len() <= trailing_samples {
            return messages;
        }
        let limit = phase.len() - trailing_samples;

        let sync_mask: u64 = (1u64 << SYNC_BITS) - 1;
        let mut sync_bits = 0usize;
        let mut sync0: u64 = 0;
        let mut sync1: u64 = 0;

        let mut i = 0usize;
        while i < limit {
            let d0 = phase_difference(phase[i], phase[i + 1]);
            let d1 = phase_difference(phase[i + 1], phase[i + 2]);

            sync0 = ((sync0 << 1) | (d0 > 0) as u64) & sync_mask;
            sync1 = ((sync1 << 1) | (d1 > 0) as u64) & sync_mask;

            sync_bits += 1;
            if sync_bits >= SYNC_BITS {
                // Check both registers against both sync words; on a match,
                // demodulate at that alignment and accept the first frame
                // that survives the FEC.
                let candidates = [
                    (sync0, 0usize, true),
                    (sync1, 1, true),
                    (sync0, 0, false),
                    (sync1, 1, false),
                ];
                for &(word, k, downlink) in &candidates {
                    let pattern = if downlink {
                        DOWNLINK_SYNC_WORD
                    } else {
                        UPLINK_SYNC_WORD
                    };
                    if !sync_word_match(word, pattern) {
                        continue;
                    }

                    let start = i - SYNC_BITS * 2 + 2 + k;
                    let start_timestamp = timestamp + start as u64 * 1000 / SAMPLES_PER_SECOND;
                    if let Some(message) = self.demod_best(phase, start, downlink, start_timestamp)
                    {
                        i = start + message.bit_length() * 2;
                        sync_bits = 0;
                        messages.push(message);
                        break;
                    }
                }
            }

            i += 2;
        }

        messages
    }

    /// Try both `start` and `start + 1` (half-sample dither) and keep the
    /// result with fewer corrected errors; ties favor `start`.
    fn demod_best(
        &self,
        phase: &[u16],
        start: usize,
        downlink: bool,
        timestamp: u64,
    ) -> Option<RawMessage> {
        let demod_one = |s| {
            if downlink {
                self.demod_one_downlink(phase, s, timestamp)
            } else {
                self.demod_one_uplink(phase, s, timestamp)
            }
        };

        match (demod_one(start), demod_one(start + 1)) {
            (Some(m0), Some(m1)) => Some(if m0.errors <= m1.errors { m0 } else { m1 }),
            (m0, m1) => m0.or(m1),
        }
    }

    fn demod_one_downlink(&self, phase: &[u16], start: usize, timestamp: u64) -> Option<RawMessage> {
        let center = check_sync_word(phase, start, DOWNLINK_SYNC_WORD)?;
        let raw = demod_bits(phase, start + SYNC_BITS * 2, DOWNLINK_LONG_BYTES, center);
        let (corrected, errors) = self.fec.correct_downlink(&raw)?;
        Some(RawMessage::new(corrected, timestamp, errors, 0.0))
    }

    fn demod_one_uplink(&self, phase: &[u16], start: usize, timestamp: u64) -> Option<RawMessage> {
        let center = check_sync_word(phase, start, UPLINK_SYNC_WORD)?;
        let raw = demod_bits(phase, start + SYNC_BITS * 2, UPLINK_BYTES, center);
        let (corrected, errors) = self.fec.correct_uplink(&raw)?;
        Some(RawMessage::new(corrected, timestamp, errors, 0.0))
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Demodulator::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
