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
use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::{audio::Latency, protocol::ProtocolMode};

const ENV_PREFIX: &str = "LINKSYNTH";

const DEFAULT_AUDIO_DEVICE: &str = "default";
const DEFAULT_SOURCE_SAMPLE_RATE: u32 = 4000;
const DEFAULT_UPSAMPLE_RATIO: usize = 12;
const DEFAULT_RAW_BLOCK_SIZE: usize = 512;
const DEFAULT_SYNTH_SAMPLE_RATE: u32 = 48000;
const DEFAULT_SYNTH_BLOCK_SIZE: usize = 512;
const DEFAULT_MAX_VOICES: usize = 8;
const DEFAULT_INITIAL_VOLUME: f32 = 0.8;
const DEFAULT_DETECT_WINDOW: Duration = Duration::from_secs(3);
const DEFAULT_DETECT_MAX_BYTES: usize = 50;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1);
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// A YAML representation of the receiver configuration. Every field is optional and
/// falls back to the values the link firmware is deployed with.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Receiver {
    /// The audio output device. "default" picks the host default output.
    audio_device: Option<String>,

    /// The link protocol: "midi", "audio" or "auto" to detect it (default: auto).
    protocol: Option<String>,

    /// Sample rate of raw PCM on the link, in Hz (default: 4000).
    source_sample_rate: Option<u32>,

    /// Integer factor between the link rate and the output rate (default: 12).
    upsample_ratio: Option<usize>,

    /// Samples decoded per raw block before resampling (default: 512).
    raw_block_size: Option<usize>,

    /// Output sample rate of the synthesizer, in Hz (default: 48000).
    synth_sample_rate: Option<u32>,

    /// Frames per synthesizer callback block (default: 512).
    synth_block_size: Option<usize>,

    /// Size of the voice pool (default: 8).
    max_voices: Option<usize>,

    /// Synthesizer volume before any volume controller arrives (default: 0.8).
    initial_volume: Option<f32>,

    /// How long to collect bytes for protocol detection (default: 3s).
    detect_window: Option<String>,

    /// Maximum bytes collected for protocol detection (default: 50).
    detect_max_bytes: Option<usize>,

    /// Upper bound on a single link read (default: 1ms).
    read_timeout: Option<String>,

    /// Capacity of the event queue between the parser and the synthesizer (default: 256).
    event_queue_capacity: Option<usize>,

    /// Output buffering: "low" asks for block sized device buffers, "high" leaves the
    /// buffer size to the device (default: low).
    latency: Option<String>,
}

impl Receiver {
    /// Creates a receiver configuration with every value defaulted.
    pub fn new() -> Receiver {
        Receiver::default()
    }

    /// Parse a receiver configuration from a YAML file, with environment overrides.
    pub fn deserialize(path: &Path) -> Result<Receiver, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Receiver>()?)
    }

    /// Builds a receiver configuration from environment variables alone.
    pub fn from_env() -> Result<Receiver, ConfigError> {
        Ok(Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Receiver>()?)
    }

    /// Overrides the audio device.
    pub fn with_audio_device(mut self, device: &str) -> Receiver {
        self.audio_device = Some(device.to_string());
        self
    }

    /// Checks values that deserialize fine but can't drive a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_sample_rate() == 0 || self.synth_sample_rate() == 0 {
            return Err(ConfigError::Invalid(
                "sample rates must be greater than 0".to_string(),
            ));
        }
        if self.upsample_ratio() == 0 {
            return Err(ConfigError::Invalid(
                "upsample_ratio must be at least 1".to_string(),
            ));
        }
        if self.raw_block_size() == 0 || self.synth_block_size() == 0 {
            return Err(ConfigError::Invalid(
                "block sizes must be greater than 0".to_string(),
            ));
        }
        if self.max_voices() == 0 {
            return Err(ConfigError::Invalid(
                "max_voices must be at least 1".to_string(),
            ));
        }
        if self.event_queue_capacity() == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_volume()) {
            return Err(ConfigError::Invalid(format!(
                "initial_volume must be within [0, 1], got {}",
                self.initial_volume()
            )));
        }
        self.protocol()?;
        self.latency()?;
        self.detect_window()?;
        self.read_timeout()?;
        Ok(())
    }

    pub fn audio_device(&self) -> &str {
        self.audio_device.as_deref().unwrap_or(DEFAULT_AUDIO_DEVICE)
    }

    /// The forced protocol, or None when it should be detected.
    pub fn protocol(&self) -> Result<Option<ProtocolMode>, ConfigError> {
        match self.protocol.as_deref() {
            None | Some("auto") => Ok(None),
            Some(protocol) => protocol
                .parse::<ProtocolMode>()
                .map(Some)
                .map_err(ConfigError::Invalid),
        }
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate.unwrap_or(DEFAULT_SOURCE_SAMPLE_RATE)
    }

    pub fn upsample_ratio(&self) -> usize {
        self.upsample_ratio.unwrap_or(DEFAULT_UPSAMPLE_RATIO)
    }

    /// The output rate of the raw path: the link rate times the upsample ratio.
    pub fn raw_output_sample_rate(&self) -> u32 {
        self.source_sample_rate().saturating_mul(self.upsample_ratio() as u32)
    }

    pub fn raw_block_size(&self) -> usize {
        self.raw_block_size.unwrap_or(DEFAULT_RAW_BLOCK_SIZE)
    }

    pub fn synth_sample_rate(&self) -> u32 {
        self.synth_sample_rate.unwrap_or(DEFAULT_SYNTH_SAMPLE_RATE)
    }

    pub fn synth_block_size(&self) -> usize {
        self.synth_block_size.unwrap_or(DEFAULT_SYNTH_BLOCK_SIZE)
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices.unwrap_or(DEFAULT_MAX_VOICES)
    }

    pub fn initial_volume(&self) -> f32 {
        self.initial_volume.unwrap_or(DEFAULT_INITIAL_VOLUME)
    }

    pub fn detect_window(&self) -> Result<Duration, ConfigError> {
        parse_duration("detect_window", &self.detect_window, DEFAULT_DETECT_WINDOW)
    }

    pub fn detect_max_bytes(&self) -> usize {
        self.detect_max_bytes.unwrap_or(DEFAULT_DETECT_MAX_BYTES)
    }

    pub fn read_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("read_timeout", &self.read_timeout, DEFAULT_READ_TIMEOUT)
    }

    pub fn event_queue_capacity(&self) -> usize {
        self.event_queue_capacity.unwrap_or(DEFAULT_EVENT_QUEUE_CAPACITY)
    }

    pub fn latency(&self) -> Result<Latency, ConfigError> {
        match self.latency.as_deref() {
            None => Ok(Latency::Low),
            Some(latency) => latency.parse::<Latency>().map_err(ConfigError::Invalid),
        }
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => DurationString::from_string(value.clone())
            .map(Into::into)
            .map_err(|e| ConfigError::Duration {
                field,
                value: value.clone(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}
