// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    link::{ByteSource, LinkError},
    stats::Stats,
};

/// Samples louder than this are line noise rather than signal.
pub const NOISE_THRESHOLD: i16 = 32000;

/// Whether the link was still up at the end of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closed,
}

/// Decodes a little-endian sample, replacing line noise with silence.
pub fn decode_sample(bytes: [u8; 2]) -> i16 {
    let sample = i16::from_le_bytes(bytes);
    if sample.unsigned_abs() > NOISE_THRESHOLD as u16 {
        0
    } else {
        sample
    }
}

/// Outcome of reading one sample's bytes.
enum Pair {
    Full([u8; 2]),
    Short,
    Closed,
}

/// Reads fixed-size blocks of 16 bit samples. Every block is full length: samples that
/// don't arrive in time are silent.
pub struct RawSampleDecoder {
    block: Vec<i16>,
    read_timeout: Duration,
    stats: Arc<Stats>,
}

impl RawSampleDecoder {
    pub fn new(block_size: usize, read_timeout: Duration, stats: Arc<Stats>) -> RawSampleDecoder {
        RawSampleDecoder {
            block: vec![0; block_size.max(1)],
            read_timeout,
            stats,
        }
    }

    /// Fills the next block from the link. Once the link closes the rest of the block is
    /// silence and [LinkState::Closed] is returned.
    pub fn read_block(&mut self, source: &mut dyn ByteSource) -> Result<LinkState, LinkError> {
        let mut state = LinkState::Open;
        let mut noisy = 0;

        for index in 0..self.block.len() {
            let pair = match state {
                LinkState::Open => self.read_pair(source)?,
                LinkState::Closed => Pair::Closed,
            };
            self.block[index] = match pair {
                Pair::Full(bytes) => {
                    let sample = decode_sample(bytes);
                    if sample == 0 && bytes != [0, 0] {
                        self.stats.record_noise_sample();
                        noisy += 1;
                    }
                    self.stats.record_sample_decoded();
                    sample
                }
                Pair::Short => {
                    self.stats.record_short_read();
                    0
                }
                Pair::Closed => {
                    state = LinkState::Closed;
                    self.stats.record_short_read();
                    0
                }
            };
        }

        if noisy > 0 {
            warn!(samples = noisy, "Replaced line noise with silence.");
        }
        Ok(state)
    }

    /// Reads one sample's worth of bytes. A pair that doesn't arrive within the timeout
    /// is lost.
    fn read_pair(&mut self, source: &mut dyn ByteSource) -> Result<Pair, LinkError> {
        let mut bytes = [0u8; 2];
        let mut filled = 0;
        // A second read completes a pair split across two deliveries.
        for _ in 0..2 {
            match source.read(&mut bytes[filled..], self.read_timeout) {
                Ok(count) => filled += count,
                Err(LinkError::Closed) => {
                    self.stats.record_bytes(filled);
                    return Ok(Pair::Closed);
                }
                Err(e) => return Err(e),
            }
            if filled == 0 || filled == bytes.len() {
                break;
            }
        }
        self.stats.record_bytes(filled);

        Ok(if filled == bytes.len() {
            Pair::Full(bytes)
        } else {
            Pair::Short
        })
    }

    /// The most recently decoded block.
    pub fn block(&self) -> &[i16] {
        &self.block
    }

    pub fn block_size(&self) -> usize {
        self.block.len()
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use crate::{link::mock, stats::Stats, testutil::encode_samples as encode};

    use super::*;

    fn decoder(block_size: usize) -> (RawSampleDecoder, Arc<Stats>) {
        let stats = Arc::new(Stats::default());
        (
            RawSampleDecoder::new(block_size, Duration::from_millis(1), stats.clone()),
            stats,
        )
    }

    #[test]
    fn test_decode_sample() {
        assert_eq!(decode_sample([0x00, 0x00]), 0);
        assert_eq!(decode_sample([0x01, 0x00]), 1);
        assert_eq!(decode_sample([0xff, 0xff]), -1);
        assert_eq!(decode_sample(32000i16.to_le_bytes()), 32000);
        assert_eq!(decode_sample((-32000i16).to_le_bytes()), -32000);
        assert_eq!(decode_sample(32001i16.to_le_bytes()), 0);
        assert_eq!(decode_sample((-32001i16).to_le_bytes()), 0);
        assert_eq!(decode_sample(i16::MIN.to_le_bytes()), 0);
        assert_eq!(decode_sample(i16::MAX.to_le_bytes()), 0);
    }

    #[test]
    fn test_full_block() {
        let (mut decoder, stats) = decoder(4);
        let mut source = mock::ByteSource::with_bytes("mock", &encode(&[1, -2, 300, -400]));

        assert_eq!(decoder.read_block(&mut source).unwrap(), LinkState::Open);
        assert_eq!(decoder.block(), &[1, -2, 300, -400]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_decoded, 4);
        assert_eq!(snapshot.bytes_received, 8);
        assert_eq!(snapshot.short_reads, 0);
    }

    #[test]
    fn test_noise_is_replaced() {
        let (mut decoder, stats) = decoder(3);
        let mut source = mock::ByteSource::with_bytes("mock", &encode(&[100, 32767, -32768]));

        decoder.read_block(&mut source).unwrap();
        assert_eq!(decoder.block(), &[100, 0, 0]);
        assert_eq!(stats.snapshot().noise_samples, 2);
    }

    #[test]
    fn test_starved_link_yields_silence() {
        let (mut decoder, stats) = decoder(8);
        let mut source = mock::ByteSource::with_bytes("mock", &encode(&[5, 6]));

        assert_eq!(decoder.read_block(&mut source).unwrap(), LinkState::Open);
        assert_eq!(decoder.block(), &[5, 6, 0, 0, 0, 0, 0, 0]);
        assert_eq!(stats.snapshot().short_reads, 6);
    }

    #[test]
    fn test_split_pair_is_reassembled() {
        let (mut decoder, _) = decoder(3);
        let mut source =
            mock::ByteSource::with_bytes("mock", &encode(&[7, -8, 9])).with_max_read(1);

        decoder.read_block(&mut source).unwrap();
        assert_eq!(decoder.block(), &[7, -8, 9]);
    }

    #[test]
    fn test_odd_trailing_byte_is_lost() {
        let (mut decoder, stats) = decoder(2);
        let mut source = mock::ByteSource::with_bytes("mock", &[0x10, 0x00, 0x20]);

        decoder.read_block(&mut source).unwrap();
        assert_eq!(decoder.block(), &[0x10, 0]);
        assert_eq!(stats.snapshot().bytes_received, 3);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_closed_mid_block_is_full_length() {
        let (mut decoder, stats) = decoder(16);
        let mut source = mock::ByteSource::with_bytes("mock", &encode(&[1, 2, 3]));
        source.close();

        assert_eq!(decoder.read_block(&mut source).unwrap(), LinkState::Closed);
        let mut expected = vec![0i16; 16];
        expected[..3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(decoder.block(), expected.as_slice());
        assert_eq!(stats.snapshot().short_reads, 13);
    }

    #[test]
    fn test_closed_link_decodes_all_zeros() {
        let (mut decoder, _) = decoder(32);
        let mut source = mock::ByteSource::new("mock");
        source.close();

        assert_eq!(decoder.read_block(&mut source).unwrap(), LinkState::Closed);
        assert_eq!(decoder.block().len(), 32);
        assert!(decoder.block().iter().all(|&s| s == 0));
        // Stops reading once the link is known to be gone.
        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_previous_block_is_overwritten() {
        let (mut decoder, _) = decoder(2);
        let mut source = mock::ByteSource::with_bytes("mock", &encode(&[11, 12]));
        decoder.read_block(&mut source).unwrap();
        assert_eq!(decoder.block(), &[11, 12]);

        decoder.read_block(&mut source).unwrap();
        assert_eq!(decoder.block(), &[0, 0]);
    }
}
