//! Reed-Solomon error correction for the three UAT frame shapes.
//!
//! All three codes live in GF(2^8) with generator polynomial 0x187 and
//! first consecutive root 120:
//!
//! - downlink short: RS(30,18), 12 parity bytes, pad 225
//! - downlink long:  RS(48,34), 14 parity bytes, pad 207
//! - uplink block:   RS(92,72), 20 parity bytes, pad 163
//!
//! The decoder is the classic syndrome / Berlekamp-Massey / Chien / Forney
//! chain over the shortened codeword (the pad region is implicit leading
//! zeros; an error located there makes the word uncorrectable).

use crate::protocol::*;

// ---------------------------------------------------------------------------
// GF(2^8) arithmetic tables
// ---------------------------------------------------------------------------

/// exp/log tables for one generator polynomial.
struct GfTables {
    exp: [u8; 512], // exp[i] = alpha^i, doubled so products need no mod
    log: [u16; 256], // log[x] = i where alpha^i = x (log[0] unused)
}

impl GfTables {
    fn new(gfpoly: u32) -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u16; 256];

        let mut x: u32 = 1;
        for i in 0..255u16 {
            exp[i as usize] = x as u8;
            log[x as usize] = i;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= gfpoly;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }

        GfTables { exp, log }
    }

    #[inline]
    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] as usize + self.log[b as usize] as usize]
    }

    #[inline]
    fn div(&self, a: u8, b: u8) -> u8 {
        debug_assert!(b != 0);
        if a == 0 {
            return 0;
        }
        let idx = (self.log[a as usize] as usize + 255 - self.log[b as usize] as usize) % 255;
        self.exp[idx]
    }

    #[inline]
    fn pow(&self, a: u8, p: usize) -> u8 {
        if a == 0 {
            return 0;
        }
        self.exp[(self.log[a as usize] as usize * p) % 255]
    }
}

// ---------------------------------------------------------------------------
// One shortened RS code
// ---------------------------------------------------------------------------

/// A shortened Reed-Solomon code over GF(2^8).
///
/// The codeword occupies `255 - pad` bytes, parity last. `decode` corrects
/// up to `nroots / 2` symbol errors in place and reports how many it fixed.
struct ReedSolomon {
    gf: GfTables,
    fcr: usize,
    nroots: usize,
    pad: usize,
    /// Generator polynomial, highest-degree coefficient first (monic).
    genpoly: Vec<u8>,
}

impl ReedSolomon {
    fn new(gfpoly: u32, fcr: usize, _prim: usize, nroots: usize, pad: usize) -> Self {
        let gf = GfTables::new(gfpoly);

        // genpoly = prod_{i=0}^{nroots-1} (x - alpha^(fcr+i))
        let mut gen = vec![0u8; nroots + 1];
        gen[nroots] = 1;
        for i in 0..nroots {
            let root = gf.exp[(fcr + i) % 255];
            let mut next = vec![0u8; nroots + 1];
            for j in 0..=nroots {
                if gen[j] != 0 {
                    if j > 0 {
                        next[j - 1] ^= gen[j];
                    }
                    next[j] ^= gf.mul(gen[j], root);
                }
            }
            gen = next;
        }

        ReedSolomon {
            gf,
            fcr,
            nroots,
            pad,
            genpoly: gen,
        }
    }

    /// Shortened codeword length in bytes.
    fn block_len(&self) -> usize {
        255 - self.pad
    }

    /// Data bytes per codeword.
    fn data_len(&self) -> usize {
        self.block_len() - self.nroots
    }

    /// Maximum correctable symbol errors.
    fn max_errors(&self) -> usize {
        self.nroots / 2
    }

    /// Systematic encode: returns `data` followed by parity.
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        assert_eq!(data.len(), self.data_len());

        let mut parity = vec![0u8; self.nroots];
        for &byte in data {
            let feedback = byte ^ parity[0];
            parity.copy_within(1.., 0);
            parity[self.nroots - 1] = 0;
            if feedback != 0 {
                for j in 0..self.nroots {
                    parity[j] ^= self.gf.mul(feedback, self.genpoly[j + 1]);
                }
            }
        }

        let mut codeword = Vec::with_capacity(self.block_len());
        codeword.extend_from_slice(data);
        codeword.extend_from_slice(&parity);
        codeword
    }

    /// Correct `block` in place. Returns the number of corrected symbols,
    /// or `None` if the word is uncorrectable (contents are then undefined).
    fn decode(&self, block: &mut [u8]) -> Option<usize> {
        assert_eq!(block.len(), self.block_len());
        let nn = self.block_len();

        // Syndromes S_j = R(alpha^(fcr+j)); the implicit pad zeros at the
        // high-degree end contribute nothing.
        let mut syndromes = vec![0u8; self.nroots];
        let mut all_zero = true;
        for (j, s) in syndromes.iter_mut().enumerate() {
            let root = self.gf.exp[(self.fcr + j) % 255];
            let mut acc = 0u8;
            for &b in block.iter() {
                acc = self.gf.mul(acc, root) ^ b;
            }
            *s = acc;
            all_zero &= acc == 0;
        }
        if all_zero {
            return Some(0);
        }

        let sigma = self.berlekamp_massey(&syndromes);
        let num_errors = sigma.len() - 1;
        if num_errors == 0 || num_errors > self.max_errors() {
            return None;
        }

        // Chien search over the whole field; roots of sigma are the inverse
        // error locators.
        let mut positions = Vec::with_capacity(num_errors);
        let mut x_invs = Vec::with_capacity(num_errors);
        for i in 0..255usize {
            let x = self.gf.exp[i];
            if self.eval_poly(&sigma, x) != 0 {
                continue;
            }
            let p = (255 - i) % 255; // power position of the error term
            if p >= nn {
                return None; // error located in the pad region
            }
            positions.push(nn - 1 - p);
            x_invs.push(x);
        }
        if positions.len() != num_errors {
            return None;
        }

        // Forney: omega(x) = S(x) * sigma(x) mod x^nroots
        let mut omega = vec![0u8; self.nroots];
        for i in 0..self.nroots {
            for j in 0..sigma.len().min(i + 1) {
                omega[i] ^= self.gf.mul(sigma[j], syndromes[i - j]);
            }
        }

        for (&pos, &x_inv) in positions.iter().zip(&x_invs) {
            let p = nn - 1 - pos;

            let omega_val = self.eval_poly(&omega, x_inv);

            // Formal derivative of sigma evaluated at X^-1.
            let mut sigma_prime = 0u8;
            for k in (1..sigma.len()).step_by(2) {
                sigma_prime ^= self.gf.mul(sigma[k], self.gf.pow(x_inv, k - 1));
            }
            if sigma_prime == 0 {
                return None;
            }

            // e = X^(1-fcr) * omega(X^-1) / sigma'(X^-1)
            let exp = ((1 - self.fcr as i64) * p as i64).rem_euclid(255) as usize;
            let x_factor = self.gf.exp[exp];
            let magnitude = self
                .gf
                .div(self.gf.mul(x_factor, omega_val), sigma_prime);

            block[pos] ^= magnitude;
        }

        // Recheck: a miscorrection must not escape as success.
        for j in 0..self.nroots {
            let root = self.gf.exp[(self.fcr + j) % 255];
            let mut acc = 0u8;
            for &b in block.iter() {
                acc = self.gf.mul(acc, root) ^ b;
            }
            if acc != 0 {
                return None;
            }
        }

        Some(num_errors)
    }

    /// Berlekamp-Massey: error locator polynomial, constant term first.
    fn berlekamp_massey(&self, syndromes: &[u8]) -> Vec<u8> {
        let nsym = syndromes.len();

        let mut c = vec![0u8; nsym + 1];
        c[0] = 1;
        let mut b = vec![0u8; nsym + 1];
        b[0] = 1;

        let mut l = 0usize;
        let mut m = 1usize;
        let mut bb = 1u8;

        for n in 0..nsym {
            let mut d = syndromes[n];
            for i in 1..=l {
                d ^= self.gf.mul(c[i], syndromes[n - i]);
            }

            if d == 0 {
                m += 1;
            } else if 2 * l <= n {
                let t = c.clone();
                let coeff = self.gf.div(d, bb);
                for i in 0..=nsym {
                    if i + m <= nsym {
                        c[i + m] ^= self.gf.mul(coeff, b[i]);
                    }
                }
                l = n + 1 - l;
                b = t;
                bb = d;
                m = 1;
            } else {
                let coeff = self.gf.div(d, bb);
                for i in 0..=nsym {
                    if i + m <= nsym {
                        c[i + m] ^= self.gf.mul(coeff, b[i]);
                    }
                }
                m += 1;
            }
        }

        let degree = c.iter().rposition(|&x| x != 0).unwrap_or(0);
        c.truncate(degree + 1);
        c
    }

    /// Evaluate a constant-first polynomial at x.
    fn eval_poly(&self, poly: &[u8], x: u8) -> u8 {
        let mut result = 0u8;
        let mut x_pow = 1u8;
        for &coeff in poly {
            result ^= self.gf.mul(coeff, x_pow);
            x_pow = self.gf.mul(x_pow, x);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// UAT frame correction
// ---------------------------------------------------------------------------

/// The three UAT Reed-Solomon decoders.
pub struct Fec {
    downlink_short: ReedSolomon,
    downlink_long: ReedSolomon,
    uplink: ReedSolomon,
}

impl Fec {
    pub fn new() -> Self {
        Fec {
            downlink_short: ReedSolomon::new(DOWNLINK_POLY, 120, 1, 12, 225),
            downlink_long: ReedSolomon::new(DOWNLINK_POLY, 120, 1, 14, 207),
            uplink: ReedSolomon::new(UPLINK_POLY, 120, 1, 20, 163),
        }
    }

    /// Correct a downlink frame sliced at the long-frame length.
    ///
    /// Tries the long code first; a frame that corrects with a nonzero
    /// payload-type field is accepted as long. Otherwise the first 30 bytes
    /// of the unmodified input are retried as a short frame, accepted when
    /// the corrected payload-type field is zero. Returns the data bytes and
    /// the corrected-symbol count.
    pub fn correct_downlink(&self, raw: &[u8]) -> Option<(Vec<u8>, usize)> {
        if raw.len() != DOWNLINK_LONG_BYTES {
            return None;
        }

        let mut long = raw.to_vec();
        if let Some(errors) = self.downlink_long.decode(&mut long) {
            if errors <= 7 && (long[0] >> 3) != 0 {
                long.truncate(DOWNLINK_LONG_DATA_BYTES);
                return Some((long, errors));
            }
        }

        let mut short = raw[..DOWNLINK_SHORT_BYTES].to_vec();
        if let Some(errors) = self.downlink_short.decode(&mut short) {
            if errors <= 6 && (short[0] >> 3) == 0 {
                short.truncate(DOWNLINK_SHORT_DATA_BYTES);
                return Some((short, errors));
            }
        }

        None
    }

    /// Correct an uplink frame: deinterleave into six blocks, decode each,
    /// and concatenate the data sections. Any block failing or needing more
    /// than 10 corrections fails the whole frame.
    pub fn correct_uplink(&self, raw: &[u8]) -> Option<(Vec<u8>, usize)> {
        if raw.len() != UPLINK_BYTES {
            return None;
        }

        let mut corrected = Vec::with_capacity(UPLINK_DATA_BYTES);
        let mut blockdata = [0u8; UPLINK_BLOCK_BYTES];
        let mut total_errors = 0usize;

        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            for (i, b) in blockdata.iter_mut().enumerate() {
                *b = raw[i * UPLINK_BLOCKS_PER_FRAME + block];
            }

            let errors = self.uplink.decode(&mut blockdata)?;
            if errors > 10 {
                return None;
            }
            total_errors += errors;

            corrected.extend_from_slice(&blockdata[..UPLINK_BLOCK_DATA_BYTES]);
        }

        Some((corrected, total_errors))
    }

    /// Encode a short downlink payload into its 30-byte codeword.
    pub fn encode_downlink_short(&self, data: &[u8]) -> Vec<u8> {
        self.downlink_short.encode(data)
    }

    /// Encode a long downlink payload into its 48-byte codeword.
    pub fn encode_downlink_long(&self, data: &[u8]) -> Vec<u8> {
        self.downlink_long.encode(data)
    }

    /// Encode 432 uplink data bytes into the 552-byte interleaved frame.
    pub fn encode_uplink(&self, data: &[u8]) -> Vec<u8> {
        assert_eq!(data.len(), UPLINK_DATA_BYTES);

        let mut wire = vec![0u8; UPLINK_BYTES];
        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            let start = block * UPLINK_BLOCK_DATA_BYTES;
            let codeword = self
                .uplink
                .encode(&data[start..start + UPLINK_BLOCK_DATA_BYTES]);
            for (i, &b) in codeword.iter().enumerate() {
                wire[i * UPLINK_BLOCKS_PER_FRAME + block] = b;
            }
        }
        wire
    }
}

impl Default for Fec {
    fn default() -> Self {
        Fec::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn short_payload() -> Vec<u8> {
        // payload type 0 (top 5 bits zero) so the short path accepts it
        let mut data = vec![0u8; DOWNLINK_SHORT_DATA_BYTES];
        data[0] = 0x00;
        for (i, b) in data.iter_mut().enumerate().skip(1) {
            *b = (i * 37 + 11) as u8;
        }
        data
    }

    fn long_payload() -> Vec<u8> {
        // payload type 1 (first byte 0x08) so the long path accepts it
        let mut data = vec![0u8; DOWNLINK_LONG_DATA_BYTES];
        data[0] = 0x08;
        for (i, b) in data.iter_mut().enumerate().skip(1) {
            *b = (i * 29 + 5) as u8;
        }
        data
    }

    #[test]
    fn test_gf_tables_self_consistent() {
        let gf = GfTables::new(DOWNLINK_POLY);
        assert_eq!(gf.exp[0], 1);
        assert_eq!(gf.exp[255], 1); // field order wraps
        for x in 1..=255u8 {
            assert_eq!(gf.div(gf.mul(x, 0x53), 0x53), x);
        }
    }

    #[test]
    fn test_clean_long_frame_decodes_with_zero_errors() {
        let fec = Fec::new();
        let codeword = fec.encode_downlink_long(&long_payload());
        let (data, errors) = fec.correct_downlink(&codeword).unwrap();
        assert_eq!(data, long_payload());
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_long_frame_corrects_up_to_seven_errors() {
        let fec = Fec::new();
        let clean = fec.encode_downlink_long(&long_payload());

        for n_errors in 1..=7 {
            let mut corrupted = clean.clone();
            for e in 0..n_errors {
                corrupted[e * 6 + 1] ^= 0x55 + e as u8;
            }
            let (data, errors) = fec
                .correct_downlink(&corrupted)
                .unwrap_or_else(|| panic!("{n_errors} errors should correct"));
            assert_eq!(data, long_payload());
            assert_eq!(errors, n_errors);
        }
    }

    #[test]
    fn test_long_frame_eight_errors_fails() {
        let fec = Fec::new();
        let mut corrupted = fec.encode_downlink_long(&long_payload());
        for e in 0..8 {
            corrupted[e * 5 + 2] ^= 0xa5;
        }
        assert!(fec.correct_downlink(&corrupted).is_none());
    }

    #[test]
    fn test_short_frame_recovered_from_long_slice() {
        // Over the air a short frame is followed by whatever noise the
        // slicer picked up; correct_downlink always sees 48 bytes.
        let fec = Fec::new();
        let mut wire = fec.encode_downlink_short(&short_payload());
        wire.resize(DOWNLINK_LONG_BYTES, 0xaa);

        let (data, errors) = fec.correct_downlink(&wire).unwrap();
        assert_eq!(data, short_payload());
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_short_frame_corrects_up_to_six_errors() {
        let fec = Fec::new();
        let mut wire = fec.encode_downlink_short(&short_payload());
        wire.resize(DOWNLINK_LONG_BYTES, 0xaa);

        for e in 0..6 {
            wire[e * 4 + 1] ^= 0x3c + e as u8;
        }
        let (data, errors) = fec.correct_downlink(&wire).unwrap();
        assert_eq!(data, short_payload());
        assert_eq!(errors, 6);
    }

    #[test]
    fn test_downlink_wrong_length_rejected() {
        let fec = Fec::new();
        assert!(fec.correct_downlink(&[0u8; 30]).is_none());
        assert!(fec.correct_downlink(&[0u8; 47]).is_none());
    }

    #[test]
    fn test_type_field_selects_frame_shape() {
        // A long codeword whose type field is zero must not be accepted as
        // long even though the long decode itself succeeds.
        let fec = Fec::new();
        let mut data = long_payload();
        data[0] = 0x00;
        let codeword = fec.encode_downlink_long(&data);
        assert!(fec.correct_downlink(&codeword).is_none());
    }

    #[test]
    fn test_uplink_roundtrip_clean() {
        let fec = Fec::new();
        let data: Vec<u8> = (0..UPLINK_DATA_BYTES).map(|i| (i * 13 + 7) as u8).collect();
        let wire = fec.encode_uplink(&data);
        let (decoded, errors) = fec.correct_uplink(&wire).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_uplink_corrects_ten_errors_per_block() {
        let fec = Fec::new();
        let data: Vec<u8> = (0..UPLINK_DATA_BYTES).map(|i| (i * 13 + 7) as u8).collect();
        let mut wire = fec.encode_uplink(&data);

        // 10 errors in block 0 and 10 in block 3 (positions in wire order:
        // block b occupies indices i*6 + b)
        for e in 0..10 {
            wire[(e * 9) * 6] ^= 0x11 + e as u8;
            wire[(e * 9) * 6 + 3] ^= 0x77 - e as u8;
        }

        let (decoded, errors) = fec.correct_uplink(&wire).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(errors, 20);
    }

    #[test]
    fn test_uplink_eleven_errors_in_one_block_fails() {
        let fec = Fec::new();
        let data: Vec<u8> = (0..UPLINK_DATA_BYTES).map(|i| (i * 13 + 7) as u8).collect();
        let mut wire = fec.encode_uplink(&data);
        for e in 0..11 {
            wire[(e * 8) * 6] ^= 0x42;
        }
        assert!(fec.correct_uplink(&wire).is_none());
    }

    #[test]
    fn test_uplink_wrong_length_rejected() {
        let fec = Fec::new();
        assert!(fec.correct_uplink(&[0u8; 100]).is_none());
    }

    #[test]
    fn test_error_count_matches_corruption() {
        let fec = Fec::new();
        let clean = fec.encode_downlink_long(&long_payload());
        let mut corrupted = clean.clone();
        corrupted[10] ^= 0x01;
        corrupted[40] ^= 0xff;
        let (_, errors) = fec.correct_downlink(&corrupted).unwrap();
        assert_eq!(errors, 2);
    }
}
