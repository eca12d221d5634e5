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

//! Decides whether the link carries MIDI or raw PCM.
//!
//! Detection runs once per session over a short sample of the first bytes on the
//! link. MIDI is the fallback whenever the evidence is thin.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use tracing::{debug, info, span, Level};

use crate::link::{ByteSource, LinkError};
use crate::shutdown::StopHandle;

/// Below this many sampled bytes there is no triplet to inspect.
pub const MIN_SAMPLE_LEN: usize = 3;

/// How often sampling checks a quiet link.
const QUIET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How many MIDI-shaped triplets it takes to call the link MIDI.
const MIDI_PATTERN_THRESHOLD: usize = 2;

/// What the link carries for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Midi,
    RawAudio,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::Midi => write!(f, "midi"),
            ProtocolMode::RawAudio => write!(f, "raw-audio"),
        }
    }
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midi" => Ok(ProtocolMode::Midi),
            "audio" | "raw-audio" => Ok(ProtocolMode::RawAudio),
            _ => Err(format!("unknown protocol mode: {}", s)),
        }
    }
}

/// Counts overlapping triplets that look like a note on, note off or control
/// change message followed by two data bytes.
fn midi_patterns(sample: &[u8]) -> usize {
    sample
        .windows(3)
        .filter(|triplet| {
            matches!(triplet[0] & 0xF0, 0x80 | 0x90 | 0xB0)
                && triplet[1] <= 0x7F
                && triplet[2] <= 0x7F
        })
        .count()
}

/// Counts bytes at odd offsets with the top bit set. On a little-endian PCM stream
/// these are the high bytes of negative or loud samples, which MIDI data never has.
fn audio_like_bytes(sample: &[u8]) -> usize {
    sample
        .iter()
        .skip(1)
        .step_by(2)
        .filter(|&&byte| byte > 0x7F)
        .count()
}

/// Classifies a detection sample.
pub fn detect(sample: &[u8]) -> ProtocolMode {
    if sample.len() < MIN_SAMPLE_LEN {
        debug!(bytes = sample.len(), "Not enough data to detect protocol.");
        return ProtocolMode::Midi;
    }

    let midi_patterns = midi_patterns(sample);
    let audio_like = audio_like_bytes(sample);
    debug!(
        midi_patterns,
        audio_like,
        bytes = sample.len(),
        "Sample scored."
    );

    if midi_patterns >= MIDI_PATTERN_THRESHOLD {
        ProtocolMode::Midi
    } else if audio_like > sample.len() / 4 {
        ProtocolMode::RawAudio
    } else {
        ProtocolMode::Midi
    }
}

/// Collects up to `max_bytes` from the link, giving up once `window` has elapsed, the
/// link closes, or a stop is requested.
pub fn collect_sample(
    source: &mut dyn ByteSource,
    max_bytes: usize,
    window: Duration,
    stop: &StopHandle,
) -> Result<Vec<u8>, LinkError> {
    let mut sample = vec![0u8; max_bytes];
    let mut collected = 0;
    let start = Instant::now();

    while collected < max_bytes && start.elapsed() < window {
        let available = source.bytes_available();
        if available == 0 {
            if stop.wait_timeout(QUIET_POLL_INTERVAL) {
                break;
            }
            continue;
        }

        let want = available.min(max_bytes - collected);
        match source.read(&mut sample[collected..collected + want], Duration::ZERO) {
            Ok(count) => collected += count,
            Err(LinkError::Closed) => break,
            Err(e) => return Err(e),
        }
    }

    sample.truncate(collected);
    Ok(sample)
}

/// Settles the protocol for the session. A forced mode wins outright; otherwise the
/// link is sampled and whatever sampling left pending is discarded so steady-state
/// parsing starts clean.
pub fn resolve(
    forced: Option<ProtocolMode>,
    source: &mut dyn ByteSource,
    max_bytes: usize,
    window: Duration,
    stop: &StopHandle,
) -> Result<ProtocolMode, LinkError> {
    if let Some(mode) = forced {
        info!(mode = %mode, "Protocol forced.");
        return Ok(mode);
    }

    let span = span!(Level::INFO, "detect protocol");
    let _enter = span.enter();

    info!(link = %source, "Detecting protocol, waiting for link traffic.");
    let sample = collect_sample(source, max_bytes, window, stop)?;
    let mode = detect(&sample);
    let discarded = source.discard_pending()?;
    info!(
        mode = %mode,
        sampled = sample.len(),
        discarded,
        "Protocol detected."
    );
    Ok(mode)
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::link::mock;

    #[test]
    fn test_note_triplets_are_midi() {
        let sample = [0x90, 0x40, 0x64, 0x3C, 0x80, 0x40, 0x00, 0x90, 0x41, 0x60];
        assert_eq!(midi_patterns(&sample), 3);
        assert_eq!(detect(&sample), ProtocolMode::Midi);
    }

    #[test]
    fn test_loud_high_bytes_are_audio() {
        // Odd offsets 1, 3, 5 carry high bytes with the top bit set; no status
        // nibble in the sample forms a valid triplet.
        let sample = [0x12, 0xF3, 0x05, 0xC1, 0x33, 0xFE, 0x21, 0x10, 0x44, 0x02];
        assert!(midi_patterns(&sample) < 2);
        assert_eq!(audio_like_bytes(&sample), 3);
        assert_eq!(detect(&sample), ProtocolMode::RawAudio);
    }

    #[test]
    fn test_short_sample_defaults_to_midi() {
        assert_eq!(detect(&[]), ProtocolMode::Midi);
        assert_eq!(detect(&[0xFF, 0xFF]), ProtocolMode::Midi);
    }

    #[test]
    fn test_ambiguous_sample_defaults_to_midi() {
        // One pattern and only quiet high bytes.
        let sample = [0x90, 0x40, 0x64, 0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(detect(&sample), ProtocolMode::Midi);
    }

    #[test]
    fn test_audio_threshold_is_strict() {
        // 8 bytes, exactly 2 audio-like bytes: 2 is not > 8 / 4.
        let sample = [0x00, 0x80, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(audio_like_bytes(&sample), 2);
        assert_eq!(detect(&sample), ProtocolMode::Midi);
    }

    #[test]
    fn test_random_audio_samples() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let mut sample = [0u8; 10];
            rng.fill(&mut sample[..]);
            let mode = detect(&sample);
            if midi_patterns(&sample) < 2 && audio_like_bytes(&sample) >= 3 {
                assert_eq!(mode, ProtocolMode::RawAudio, "sample {:02X?}", sample);
            }
            if midi_patterns(&sample) >= 2 {
                assert_eq!(mode, ProtocolMode::Midi, "sample {:02X?}", sample);
            }
        }
    }

    #[test]
    fn test_sample_stops_at_max_bytes() {
        let mut source = mock::ByteSource::with_bytes("mock", &[0x42; 80]);
        let stop = StopHandle::new();
        let sample = collect_sample(&mut source, 50, Duration::from_secs(3), &stop).unwrap();
        assert_eq!(sample.len(), 50);
        assert_eq!(source.remaining(), 30);
    }

    #[test]
    fn test_sample_gives_up_after_window() {
        let mut source = mock::ByteSource::with_bytes("mock", &[0x90, 0x40]);
        let stop = StopHandle::new();
        let start = Instant::now();
        let sample = collect_sample(&mut source, 50, Duration::from_millis(50), &stop).unwrap();
        assert_eq!(sample, vec![0x90, 0x40]);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_sample_returns_early_on_stop() {
        let mut source = mock::ByteSource::new("mock");
        let stop = StopHandle::new();
        stop.stop();
        let start = Instant::now();
        let sample = collect_sample(&mut source, 50, Duration::from_secs(30), &stop).unwrap();
        assert!(sample.is_empty());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_discards_sample_leftovers() {
        let mut bytes = vec![0x90, 0x40, 0x64, 0x80, 0x40, 0x00];
        bytes.extend_from_slice(&[0x00; 60]);
        let mut source = mock::ByteSource::with_bytes("mock", &bytes);
        let stop = StopHandle::new();

        let mode = resolve(None, &mut source, 50, Duration::from_secs(3), &stop).unwrap();
        assert_eq!(mode, ProtocolMode::Midi);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_resolve_forced_leaves_link_alone() {
        let mut source = mock::ByteSource::with_bytes("mock", &[0x90, 0x40, 0x64]);
        let stop = StopHandle::new();

        let mode = resolve(
            Some(ProtocolMode::RawAudio),
            &mut source,
            50,
            Duration::from_secs(3),
            &stop,
        )
        .unwrap();
        assert_eq!(mode, ProtocolMode::RawAudio);
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.reads(), 0);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("midi".parse::<ProtocolMode>(), Ok(ProtocolMode::Midi));
        assert_eq!("audio".parse::<ProtocolMode>(), Ok(ProtocolMode::RawAudio));
        assert!("sysex".parse::<ProtocolMode>().is_err());
    }
}
