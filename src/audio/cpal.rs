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

use std::{fmt, sync::Arc, thread, time::Duration};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::{
    thread_priority::{
        callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
    },
    AudioError, Latency, RenderCallback, StreamSpec, CHANNELS,
};

/// Blocks queued between a push stream's writer and the device.
const PUSH_QUEUE_BLOCKS: usize = 2;

/// How long a push write may wait beyond the queued audio before the device is
/// considered stuck.
const STALL_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for the output thread to report that the stream is playing.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn super::Device>>, AudioError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn super::Device> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices that have at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, AudioError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(|e| AudioError::NoDevice(e.to_string()))?;
        let _shh_stderr = shh::stderr().map_err(|e| AudioError::NoDevice(e.to_string()))?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to open host"
                    );
                    continue;
                }
            };
            let host_devices = match host.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                if let Some(device) = Device::wrap(host_id, device) {
                    devices.push(device);
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Wraps a cpal device, skipping devices that can't output anything.
    fn wrap(host_id: cpal::HostId, device: cpal::Device) -> Option<Device> {
        let max_channels = device
            .supported_output_configs()
            .ok()?
            .map(|config| config.channels())
            .max()
            .unwrap_or(0);
        if max_channels == 0 {
            return None;
        }

        Some(Device {
            name: device.name().ok()?,
            max_channels,
            host_id,
            device,
        })
    }

    /// Gets the given cpal device. "default" is the default output of the default host.
    pub fn get(name: &str) -> Result<Device, AudioError> {
        if name == "default" {
            let host = cpal::default_host();
            return host
                .default_output_device()
                .and_then(|device| Device::wrap(host.id(), device))
                .ok_or_else(|| AudioError::NoDevice(name.to_string()));
        }

        Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| AudioError::NoDevice(name.to_string()))
    }

    /// Picks a stream configuration for the spec, preferring the fewest channels and
    /// native 16 bit samples.
    fn stream_config(
        &self,
        spec: &StreamSpec,
    ) -> Result<(cpal::StreamConfig, cpal::SampleFormat), AudioError> {
        let mut candidates: Vec<cpal::SupportedStreamConfigRange> = self
            .device
            .supported_output_configs()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?
            .filter(|range| {
                range.min_sample_rate() <= spec.sample_rate
                    && spec.sample_rate <= range.max_sample_rate()
                    && range.channels() >= CHANNELS
            })
            .collect();
        candidates.sort_by_key(|range| {
            (
                range.channels(),
                range.sample_format() != cpal::SampleFormat::I16,
            )
        });

        let range = candidates.into_iter().next().ok_or_else(|| {
            let message = format!("{} does not support {} Hz", self, spec.sample_rate);
            AudioError::UnsupportedFormat(message)
        })?;
        let sample_format = range.sample_format();
        let supported = range.with_sample_rate(spec.sample_rate);

        let frames = u32::try_from(spec.block_frames).unwrap_or(u32::MAX);
        let buffer_size = match (spec.latency, supported.buffer_size()) {
            (Latency::Low, cpal::SupportedBufferSize::Range { min, max })
                if (*min..=*max).contains(&frames) =>
            {
                cpal::BufferSize::Fixed(frames)
            }
            _ => cpal::BufferSize::Default,
        };

        Ok((
            cpal::StreamConfig {
                channels: supported.channels(),
                sample_rate: spec.sample_rate,
                buffer_size,
            },
            sample_format,
        ))
    }

    /// Starts an output thread that owns the cpal stream.
    fn start(&self, spec: StreamSpec, render: RenderCallback) -> Result<OutputThread, AudioError> {
        let (config, sample_format) = self.stream_config(&spec)?;
        let device = self.device.clone();
        let name = self.name.clone();
        let failure = Arc::new(Mutex::new(None::<String>));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let errors = failure.clone();
        let handle = thread::spawn(move || {
            let span = span!(Level::INFO, "output stream", device = name.as_str());
            let _enter = span.enter();

            let stream = match build_stream(&device, &config, sample_format, spec, render, errors) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AudioError::Play(e.to_string())));
                return;
            }
            info!(
                channels = config.channels,
                sample_rate = spec.sample_rate,
                buffer_size = ?config.buffer_size,
                "Output stream started."
            );
            let _ = ready_tx.send(Ok(()));

            // Keep the stream alive until asked to stop or the owner goes away.
            let _ = stop_rx.recv();
            drop(stream);
            info!("Output stream stopped.");
        });

        let started = ready_rx
            .recv_timeout(START_TIMEOUT)
            .unwrap_or_else(|e| Err(AudioError::Build(format!("stream did not start: {}", e))));

        let output = OutputThread {
            stop_tx,
            handle: Some(handle),
            failure,
        };
        started.map(|_| output)
    }
}

/// Builds the stream for the device's sample type.
fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    spec: StreamSpec,
    render: RenderCallback,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        cpal::SampleFormat::I16 => build_typed::<i16>(device, config, spec, render, failure),
        cpal::SampleFormat::I32 => build_typed::<i32>(device, config, spec, render, failure),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, config, spec, render, failure),
        cpal::SampleFormat::F32 => build_typed::<f32>(device, config, spec, render, failure),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Renders mono into a preallocated buffer and copies it to every device channel.
fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    spec: StreamSpec,
    mut render: RenderCallback,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono = vec![0i16; spec.block_frames.max(1)];
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                for frames in data.chunks_mut(mono.len() * channels) {
                    let count = frames.len() / channels;
                    let block = &mut mono[..count];
                    render(block);
                    for (frame, &sample) in frames.chunks_mut(channels).zip(block.iter()) {
                        frame.fill(T::from_sample(sample));
                    }
                }
            },
            move |err| {
                error!(err = %err, "Output stream error.");
                failure.lock().get_or_insert_with(|| err.to_string());
            },
            None,
        )
        .map_err(|e| AudioError::Build(e.to_string()))
}

/// Owns the thread holding a playing cpal stream. Dropping it stops the stream.
struct OutputThread {
    stop_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl OutputThread {
    fn health(&self) -> Result<(), AudioError> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(AudioError::Play(message.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for OutputThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct PullStream {
    output: OutputThread,
}

impl super::PullStream for PullStream {
    fn health(&self) -> Result<(), AudioError> {
        self.output.health()
    }
}

/// Buffers in circulation per push stream: the queued blocks, the one playing and the one
/// being filled.
const BUFFER_POOL: usize = PUSH_QUEUE_BLOCKS + 2;

/// The writer half of a push stream. Buffers come from a fixed pool and travel back from
/// the callback once played, so steady-state writes don't allocate.
struct BlockQueue {
    blocks: Sender<Vec<i16>>,
    recycled: Receiver<Vec<i16>>,
    spare: Option<Vec<i16>>,
    stall_timeout: Duration,
}

impl BlockQueue {
    /// Creates the queue and the callback that plays it.
    fn new(block_frames: usize, stall_timeout: Duration) -> (BlockQueue, RenderCallback) {
        let (blocks_tx, blocks_rx) = bounded(PUSH_QUEUE_BLOCKS);
        // The recycle queue holds the whole pool, so the callback never drops a buffer.
        let (recycle_tx, recycle_rx) = bounded(BUFFER_POOL);
        for _ in 0..BUFFER_POOL {
            let _ = recycle_tx.send(Vec::with_capacity(block_frames));
        }

        let queue = BlockQueue {
            blocks: blocks_tx,
            recycled: recycle_rx,
            spare: None,
            stall_timeout,
        };
        (queue, queue_renderer(blocks_rx, recycle_tx))
    }

    fn take_buffer(&mut self) -> Result<Vec<i16>, AudioError> {
        if let Some(buffer) = self.spare.take() {
            return Ok(buffer);
        }
        match self.recycled.recv_timeout(self.stall_timeout) {
            Ok(buffer) => Ok(buffer),
            Err(RecvTimeoutError::Timeout) => Err(AudioError::Stalled(self.stall_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(AudioError::Closed),
        }
    }

    fn push(&mut self, block: &[i16]) -> Result<(), AudioError> {
        let mut buffer = self.take_buffer()?;
        buffer.clear();
        buffer.extend_from_slice(block);
        match self.blocks.send_timeout(buffer, self.stall_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(buffer)) => {
                self.spare = Some(buffer);
                Err(AudioError::Stalled(self.stall_timeout))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(AudioError::Closed),
        }
    }
}

struct PushStream {
    queue: BlockQueue,
    output: OutputThread,
}

impl super::PushStream for PushStream {
    fn write(&mut self, block: &[i16]) -> Result<(), AudioError> {
        self.output.health()?;
        self.queue.push(block)
    }
}

/// The callback half of a push stream. Plays queued blocks back to back and fills
/// gaps with silence.
fn queue_renderer(blocks: Receiver<Vec<i16>>, recycle: Sender<Vec<i16>>) -> RenderCallback {
    let mut current: Vec<i16> = Vec::new();
    let mut position = 0;
    Box::new(move |out: &mut [i16]| {
        let mut filled = 0;
        while filled < out.len() {
            if position >= current.len() {
                match blocks.try_recv() {
                    Ok(next) => {
                        let played = std::mem::replace(&mut current, next);
                        if played.capacity() > 0 {
                            // Never full while the writer lives: the channel holds the pool.
                            let _ = recycle.try_send(played);
                        }
                        position = 0;
                        continue;
                    }
                    Err(_) => {
                        out[filled..].fill(0);
                        return;
                    }
                }
            }
            let count = (current.len() - position).min(out.len() - filled);
            out[filled..filled + count].copy_from_slice(&current[position..position + count]);
            position += count;
            filled += count;
        }
    })
}

impl super::Device for Device {
    fn open_push(&self, spec: StreamSpec) -> Result<Box<dyn super::PushStream>, AudioError> {
        let stall_timeout = spec.block_duration() * PUSH_QUEUE_BLOCKS as u32 + STALL_GRACE;
        let (queue, render) = BlockQueue::new(spec.block_frames, stall_timeout);
        let output = self.start(spec, render)?;
        Ok(Box::new(PushStream { queue, output }))
    }

    fn open_pull(
        &self,
        spec: StreamSpec,
        render: RenderCallback,
    ) -> Result<Box<dyn super::PullStream>, AudioError> {
        Ok(Box::new(PullStream {
            output: self.start(spec, render)?,
        }))
    }
}
