//! Streaming receiver — drives conversion and demodulation over successive
//! sample blocks with correct carry-over at block boundaries.
//!
//! The demodulator never emits a frame that starts inside the trailing
//! window of a buffer, so the receiver keeps those samples and replays them
//! at the front of the next block. The timestamp handed to the demodulator
//! is backdated by the carried sample count so that sample 0 of the buffer
//! always carries its original capture time.

use crate::demod::Demodulator;
use crate::message::RawMessage;
use crate::phase::{PhaseConverter, SampleFormat};
use crate::protocol::SAMPLES_PER_SECOND;

pub type MessageConsumer = Box<dyn FnMut(Vec<RawMessage>)>;

pub struct Receiver {
    converter: PhaseConverter,
    demodulator: Demodulator,
    phase: Vec<u16>,
    consumer: Option<MessageConsumer>,
}

impl Receiver {
    pub fn new(format: SampleFormat) -> Self {
        Receiver {
            converter: PhaseConverter::new(format),
            demodulator: Demodulator::new(),
            phase: Vec::new(),
            consumer: None,
        }
    }

    pub fn set_consumer(&mut self, consumer: MessageConsumer) {
        self.consumer = Some(consumer);
    }

    /// Length of the phase tail currently carried between blocks.
    pub fn tail_len(&self) -> usize {
        self.phase.len()
    }

    /// Handle one sample block captured at `timestamp` (Unix ms at the
    /// start of the block): convert, demodulate, dispatch, keep the tail.
    pub fn handle_samples(&mut self, timestamp: u64, buffer: &[u8]) {
        let carried = self.phase.len() as u64;
        let base_timestamp = timestamp.saturating_sub(carried * 1000 / SAMPLES_PER_SECOND);

        self.converter.convert(buffer, &mut self.phase);

        let messages = self.demodulator.demodulate(base_timestamp, &self.phase);
        if !messages.is_empty() {
            if let Some(consumer) = self.consumer.as_mut() {
                consumer(messages);
            }
        }

        // preserve the tail of the phase buffer for next time
        let tail_size = self.demodulator.num_trailing_samples();
        if self.phase.len() > tail_size {
            let drop = self.phase.len() - tail_size;
            self.phase.copy_within(drop.., 0);
            self.phase.truncate(tail_size);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::fec::Fec;
    use crate::protocol::*;

    const IDLE: u16 = 20000;

    /// CU8 bytes for a tone at constant `phase` (16-bit scaled angle).
    fn cu8_sample(phase_angle: f64) -> [u8; 2] {
        let i = 127.5 + 127.0 * phase_angle.cos();
        let q = 127.5 + 127.0 * phase_angle.sin();
        [i.round() as u8, q.round() as u8]
    }

    fn angle(scaled: u16) -> f64 {
        scaled as f64 / 32768.0 * std::f64::consts::PI - std::f64::consts::PI
    }

    fn push_bit(block: &mut Vec<u8>, bit: bool) {
        let delta: u16 = 8192;
        let second = if bit { IDLE + delta } else { IDLE - delta };
        block.extend_from_slice(&cu8_sample(angle(IDLE)));
        block.extend_from_slice(&cu8_sample(angle(second)));
    }

    /// Synthesize a CU8 block: idle lead, downlink sync + codeword, idle tail.
    fn synthesize(lead: usize, codeword: &[u8], tail: usize) -> Vec<u8> {
        let mut block = Vec::new();
        for _ in 0..lead {
            block.extend_from_slice(&cu8_sample(angle(IDLE)));
        }
        for i in (0..SYNC_BITS).rev() {
            push_bit(&mut block, DOWNLINK_SYNC_WORD & (1 << i) != 0);
        }
        for &byte in codeword {
            for i in (0..8).rev() {
                push_bit(&mut block, byte & (1 << i) != 0);
            }
        }
        for _ in 0..tail {
            block.extend_from_slice(&cu8_sample(angle(IDLE)));
        }
        block
    }

    fn test_frame() -> (Vec<u8>, Vec<u8>) {
        let fec = Fec::new();
        let mut data = vec![0u8; DOWNLINK_LONG_DATA_BYTES];
        data[0] = 0x10; // payload type 2
        for (i, b) in data.iter_mut().enumerate().skip(1) {
            *b = (i * 83 + 17) as u8;
        }
        let codeword = fec.encode_downlink_long(&data);
        (data, codeword)
    }

    fn collecting_receiver() -> (Receiver, Rc<RefCell<Vec<RawMessage>>>) {
        let mut receiver = Receiver::new(SampleFormat::Cu8);
        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = collected.clone();
        receiver.set_consumer(Box::new(move |messages| {
            sink.borrow_mut().extend(messages);
        }));
        (receiver, collected)
    }

    #[test]
    fn test_iq_roundtrip_decodes_with_zero_errors() {
        let (data, codeword) = test_frame();
        let trailing = (SYNC_BITS + UPLINK_BITS) * 2;
        let block = synthesize(1000, &codeword, trailing + 200);

        let (mut receiver, collected) = collecting_receiver();
        receiver.handle_samples(0, &block);

        let messages = collected.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, data);
        assert_eq!(messages[0].errors, 0);
    }

    #[test]
    fn test_frame_split_across_blocks() {
        let (data, codeword) = test_frame();
        let trailing = (SYNC_BITS + UPLINK_BITS) * 2;
        let block = synthesize(1000, &codeword, trailing + 200);

        let (mut receiver, collected) = collecting_receiver();

        // split in the middle of the frame body; the first block is shorter
        // than the trailing window so everything is carried over
        let split = 2 * 1400;
        receiver.handle_samples(0, &block[..split]);
        assert!(collected.borrow().is_empty());

        receiver.handle_samples(1000, &block[split..]);
        let messages = collected.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, data);
    }

    #[test]
    fn test_tail_retention_length() {
        let mut receiver = Receiver::new(SampleFormat::Cu8);
        let trailing = receiver.demodulator.num_trailing_samples();

        // short block: everything is kept
        receiver.handle_samples(0, &vec![0x80u8; 2 * 100]);
        assert_eq!(receiver.tail_len(), 100);

        // large block: exactly the trailing window remains
        receiver.handle_samples(100, &vec![0x80u8; 2 * (trailing + 5000)]);
        assert_eq!(receiver.tail_len(), trailing);
    }

    #[test]
    fn test_backdated_timestamp_for_carried_tail() {
        // Frame begins at sample 3000 of the stream; the stream arrives as
        // a 2083-sample block and then the rest. The second call's
        // timestamp is backdated by the carried samples, so the frame time
        // must match the single-block decode.
        let (_, codeword) = test_frame();
        let trailing = (SYNC_BITS + UPLINK_BITS) * 2;
        let block = synthesize(3000, &codeword, trailing + 200);

        let (mut receiver_a, collected_a) = collecting_receiver();
        receiver_a.handle_samples(500_000, &block);
        let expected = collected_a.borrow()[0].received_at;

        let (mut receiver_b, collected_b) = collecting_receiver();
        let split = 2 * 2084; // 2084 samples is just over 1 ms of stream
        receiver_b.handle_samples(500_000, &block[..split]);
        receiver_b.handle_samples(500_001, &block[split..]);

        let messages = collected_b.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].received_at, expected);
    }
}
