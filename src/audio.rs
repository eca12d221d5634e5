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

//! Mono 16 bit audio output.
//!
//! A [Device] opens streams in one of two drive models. A [PushStream] takes blocks from
//! the caller and blocks while the device catches up. A [PullStream] calls a
//! [RenderCallback] from the device's own real-time context whenever it needs samples.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

pub mod cpal;
pub mod mock;
pub mod thread_priority;

/// All streams are mono.
pub const CHANNELS: u16 = 1;

/// How eagerly the device should pursue small buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    /// Ask for buffers of exactly the block size when the device allows it.
    Low,
    /// Let the device pick its buffer size.
    High,
}

impl FromStr for Latency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Latency::Low),
            "high" => Ok(Latency::High),
            _ => Err(format!("unknown latency: {}", s)),
        }
    }
}

/// Parameters for opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub latency: Latency,
}

impl StreamSpec {
    pub fn new(sample_rate: u32, block_frames: usize) -> StreamSpec {
        StreamSpec {
            sample_rate,
            block_frames,
            latency: Latency::Low,
        }
    }

    pub fn with_latency(mut self, latency: Latency) -> StreamSpec {
        self.latency = latency;
        self
    }

    /// Wall clock time one block takes to play.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} frames, {:?} latency",
            self.sample_rate, self.block_frames, self.latency
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no audio device found with name {0}")]
    NoDevice(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("unable to build output stream: {0}")]
    Build(String),

    #[error("output stream failed: {0}")]
    Play(String),

    #[error("output stream stalled for {0:?}")]
    Stalled(Duration),

    #[error("output stream closed")]
    Closed,
}

/// Fills the given buffer with the next mono samples. Runs in the device's real-time
/// context, so it must neither block nor allocate.
pub type RenderCallback = Box<dyn FnMut(&mut [i16]) + Send + 'static>;

/// A stream fed by the caller. Dropping it stops playback.
pub trait PushStream: Send {
    /// Queues a block for playback, waiting while the device has no room for it.
    fn write(&mut self, block: &[i16]) -> Result<(), AudioError>;
}

/// A stream that pulls from a [RenderCallback]. Dropping it stops playback.
pub trait PullStream: Send {
    /// Returns an error once the device has reported a failure.
    fn health(&self) -> Result<(), AudioError>;
}

pub trait Device: fmt::Display + Send + Sync {
    /// Opens a stream the caller writes blocks to.
    fn open_push(&self, spec: StreamSpec) -> Result<Box<dyn PushStream>, AudioError>;

    /// Opens a stream that renders through the callback until dropped.
    fn open_pull(
        &self,
        spec: StreamSpec,
        render: RenderCallback,
    ) -> Result<Box<dyn PullStream>, AudioError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, AudioError> {
    cpal::Device::list()
}

/// Gets a device with the given name. "default" is the host's default output and
/// names starting with "mock" give a mock device.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, AudioError> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(cpal::Device::get(name)?))
}
