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

//! A receive session: settle the protocol, then drive audio from the link until the
//! link goes away, the device fails or a stop is requested.

use std::sync::Arc;

use tracing::{info, span, Level};

use crate::{
    audio::{AudioError, Device},
    config::{self, ConfigError},
    link::{ByteSource, LinkError},
    protocol::{self, ProtocolMode},
    shutdown::StopHandle,
    stats::Stats,
};

mod midi;
mod raw;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Picks the protocol to force. `--midi` and `--audio` win over the config file's
/// `protocol` key; None leaves the mode to detection.
pub fn forced_mode(
    midi: bool,
    audio: bool,
    config: &config::Receiver,
) -> Result<Option<ProtocolMode>, ConfigError> {
    if midi {
        Ok(Some(ProtocolMode::Midi))
    } else if audio {
        Ok(Some(ProtocolMode::RawAudio))
    } else {
        config.protocol()
    }
}

/// Runs a receive session on the given link. Returns the mode the session ran in once
/// a stop is requested. The link and any open stream are released on every return path.
pub fn run(
    config: &config::Receiver,
    forced: Option<ProtocolMode>,
    mut source: Box<dyn ByteSource>,
    device: Arc<dyn Device>,
    stats: Arc<Stats>,
    stop: StopHandle,
) -> Result<ProtocolMode, ReceiverError> {
    let span = span!(Level::INFO, "receive");
    let _enter = span.enter();

    let mode = protocol::resolve(
        forced,
        source.as_mut(),
        config.detect_max_bytes(),
        config.detect_window()?,
        &stop,
    )?;
    info!(mode = %mode, link = %source, device = %device, "Starting receiver.");

    let result = match mode {
        ProtocolMode::Midi => midi::run(config, source.as_mut(), device.as_ref(), stats, &stop),
        ProtocolMode::RawAudio => raw::run(config, source.as_mut(), device.as_ref(), stats, &stop),
    };

    drop(source);
    info!(mode = %mode, "Link closed.");
    result.map(|_| mode)
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use crate::{
        audio::{self, mock as audio_mock},
        link::mock,
        protocol::ProtocolMode,
        shutdown::StopHandle,
        stats::Stats,
        testutil::{encode_samples, eventually, receiver_config},
    };

    use super::*;

    #[test]
    fn test_forced_mode_order() {
        use ProtocolMode::{Midi, RawAudio};

        let auto = config::Receiver::new();
        let audio = receiver_config("protocol: audio");
        let midi = receiver_config("protocol: midi");

        // Flags beat the config file.
        assert_eq!(forced_mode(true, false, &audio).unwrap(), Some(Midi));
        assert_eq!(forced_mode(false, true, &midi).unwrap(), Some(RawAudio));
        // Then the config file, then detection.
        assert_eq!(forced_mode(false, false, &audio).unwrap(), Some(RawAudio));
        assert_eq!(forced_mode(false, false, &midi).unwrap(), Some(Midi));
        assert_eq!(forced_mode(false, false, &auto).unwrap(), None);

        let invalid = receiver_config("protocol: sysex");
        assert!(forced_mode(false, false, &invalid).is_err());
    }

    #[test]
    fn test_detects_midi() {
        let config = receiver_config("detect_window: 50ms\nsynth_block_size: 64");
        let link = mock::ByteSource::with_bytes(
            "mock-link",
            &[0x90, 0x40, 0x64, 0x3C, 0x80, 0x40, 0x00, 0x90, 0x41, 0x60],
        );
        let device = audio_mock::Device::get("mock-device");
        let stop = StopHandle::new();

        let handle = {
            let config = config.clone();
            let link = link.clone();
            let device: Arc<dyn audio::Device> = Arc::new(device.clone());
            let stats = Arc::new(Stats::default());
            let stop = stop.clone();
            thread::spawn(move || run(&config, None, Box::new(link), device, stats, stop))
        };

        eventually(|| device.open_streams() == 1, "MIDI stream never opened");
        assert_eq!(device.last_spec().unwrap().sample_rate, 48000);
        // The detection bytes are discarded rather than played.
        assert_eq!(link.remaining(), 0);

        stop.stop();
        assert_eq!(handle.join().unwrap().unwrap(), ProtocolMode::Midi);
        assert_eq!(device.open_streams(), 0);
    }

    #[test]
    fn test_detects_raw_audio_until_link_closes() {
        let config = receiver_config("detect_window: 50ms\nraw_block_size: 4\nupsample_ratio: 2");
        let mut sample = encode_samples(&[-200, -300, 400, -500, 600]);
        sample[1] = 0xF0;
        sample[3] = 0xF1;
        sample[5] = 0xF2;
        let link = mock::ByteSource::with_bytes("mock-link", &sample);
        let device = audio_mock::Device::get("mock-device");
        let stop = StopHandle::new();

        let handle = {
            let config = config.clone();
            let link = link.clone();
            let device: Arc<dyn audio::Device> = Arc::new(device.clone());
            let stats = Arc::new(Stats::default());
            let stop = stop.clone();
            thread::spawn(move || run(&config, None, Box::new(link), device, stats, stop))
        };

        eventually(|| device.open_streams() == 1, "raw stream never opened");
        assert_eq!(device.last_spec().unwrap().sample_rate, 8000);
        assert_eq!(device.last_spec().unwrap().block_frames, 8);

        link.push(&encode_samples(&[100, 200, 300, 400]));
        link.close();

        let result = handle.join().unwrap();
        assert!(matches!(
            result,
            Err(ReceiverError::Link(LinkError::Closed))
        ));
        assert!(device.blocks_written() >= 1);
        assert!(device.written().iter().any(|&sample| sample > 0));
        assert_eq!(device.open_streams(), 0);
    }

    #[test]
    fn test_forced_mode_skips_detection() {
        let config = receiver_config("raw_block_size: 2\nupsample_ratio: 1");
        // MIDI-looking bytes, played as audio anyway.
        let link = mock::ByteSource::with_bytes("mock-link", &[0x10, 0x00, 0x20, 0x00]);
        link.close();
        let device = audio_mock::Device::get("mock-device");

        let result = run(
            &config,
            Some(ProtocolMode::RawAudio),
            Box::new(link.clone()),
            Arc::new(device.clone()),
            Arc::new(Stats::default()),
            StopHandle::new(),
        );

        assert!(matches!(
            result,
            Err(ReceiverError::Link(LinkError::Closed))
        ));
        assert_eq!(&device.written()[..2], &[0x10, 0x20]);
    }

    #[test]
    fn test_device_failure_is_fatal() {
        let config = receiver_config("detect_window: 10ms");
        let link = mock::ByteSource::new("mock-link");
        let device = audio_mock::Device::get("mock-fail");

        let result = run(
            &config,
            Some(ProtocolMode::Midi),
            Box::new(link),
            Arc::new(device),
            Arc::new(Stats::default()),
            StopHandle::new(),
        );
        assert!(matches!(
            result,
            Err(ReceiverError::Audio(AudioError::Build(_)))
        ));
    }

    #[test]
    fn test_stop_during_detection() {
        let config = receiver_config("detect_window: 10s");
        let link = mock::ByteSource::new("mock-link");
        let device = audio_mock::Device::get("mock-device");
        let stop = StopHandle::new();
        stop.stop();

        let result = run(
            &config,
            None,
            Box::new(link),
            Arc::new(device.clone()),
            Arc::new(Stats::default()),
            stop,
        );
        // An empty sample defaults to MIDI, and the stop is honored right away.
        assert_eq!(result.unwrap(), ProtocolMode::Midi);
        assert_eq!(device.open_streams(), 0);
    }
}
