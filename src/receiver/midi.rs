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

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, TrySendError};
use tracing::{debug, info, span, warn, Level};

use crate::{
    audio::{AudioError, Device, RenderCallback, StreamSpec},
    config,
    link::ByteSource,
    midi::{MidiEvent, MidiStreamParser},
    shutdown::StopHandle,
    stats::Stats,
    synth::Synthesizer,
};

use super::ReceiverError;

/// Bytes requested from the link per read.
const READ_CHUNK: usize = 256;

/// Builds the render callback that owns the synthesizer. Queued events are applied at
/// the start of each block, so a note never changes a voice mid-block.
fn renderer(
    mut synth: Synthesizer,
    events: Receiver<MidiEvent>,
    stats: Arc<Stats>,
) -> RenderCallback {
    Box::new(move |out: &mut [i16]| {
        while let Ok(event) = events.try_recv() {
            synth.apply(event);
        }
        synth.generate(out);
        stats.record_callback();
    })
}

/// Parses MIDI off the link and plays it through a pull stream until stopped.
pub(super) fn run(
    config: &config::Receiver,
    source: &mut dyn ByteSource,
    device: &dyn Device,
    stats: Arc<Stats>,
    stop: &StopHandle,
) -> Result<(), ReceiverError> {
    let span = span!(Level::INFO, "receive (midi)");
    let _enter = span.enter();

    let read_timeout = config.read_timeout()?;
    let spec = StreamSpec::new(config.synth_sample_rate(), config.synth_block_size())
        .with_latency(config.latency()?);
    let synth = Synthesizer::new(
        spec.sample_rate,
        config.max_voices(),
        spec.block_frames,
        stats.clone(),
    )
    .with_volume(config.initial_volume());

    let (events_tx, events_rx) = bounded::<MidiEvent>(config.event_queue_capacity());
    let stream = device.open_pull(spec, renderer(synth, events_rx, stats.clone()))?;
    info!(
        spec = %spec,
        voices = config.max_voices(),
        "Synthesizer running."
    );

    let mut parser = MidiStreamParser::new(stats.clone());
    let mut buf = [0u8; READ_CHUNK];
    while !stop.is_stopped() {
        stream.health()?;

        // A closed link surfaces here as a fatal error.
        let count = source.read(&mut buf, read_timeout)?;
        if count == 0 {
            continue;
        }
        stats.record_bytes(count);
        parser.push(&buf[..count]);

        while let Some(event) = parser.next_event() {
            if let MidiEvent::ProgramChange { channel, program } = event {
                debug!(
                    channel = channel.as_int(),
                    program = program.as_int(),
                    "Program change has no effect on the single timbre."
                );
            }
            match events_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    stats.record_event_dropped();
                    warn!(event = ?event, "Event queue full, dropping event.");
                }
                Err(TrySendError::Disconnected(_)) => return Err(AudioError::Closed.into()),
            }
        }
    }

    info!("Stop requested.");
    Ok(())
}
