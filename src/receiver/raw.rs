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

use tracing::{info, span, Level};

use crate::{
    audio::{Device, StreamSpec},
    config,
    link::{ByteSource, LinkError},
    pcm::{LinkState, RawSampleDecoder, Resampler},
    shutdown::StopHandle,
    stats::Stats,
};

use super::ReceiverError;

/// Decodes raw PCM off the link, upsamples it and writes it to a push stream until
/// stopped. A link that closes mid-block still gets that block played, padded with
/// silence, before the session fails.
pub(super) fn run(
    config: &config::Receiver,
    source: &mut dyn ByteSource,
    device: &dyn Device,
    stats: Arc<Stats>,
    stop: &StopHandle,
) -> Result<(), ReceiverError> {
    let span = span!(Level::INFO, "receive (raw)");
    let _enter = span.enter();

    let ratio = config.upsample_ratio();
    let spec = StreamSpec::new(
        config.raw_output_sample_rate(),
        config.raw_block_size() * ratio,
    )
    .with_latency(config.latency()?);
    let mut decoder = RawSampleDecoder::new(
        config.raw_block_size(),
        config.read_timeout()?,
        stats.clone(),
    );
    let mut resampler = Resampler::new(ratio);

    let mut stream = device.open_push(spec)?;
    info!(
        spec = %spec,
        source_sample_rate = config.source_sample_rate(),
        ratio,
        "Raw audio stream running."
    );

    while !stop.is_stopped() {
        let state = decoder.read_block(source)?;
        stream.write(resampler.process(decoder.block()))?;
        stats.record_block_written();

        if state == LinkState::Closed {
            return Err(LinkError::Closed.into());
        }
    }

    info!("Stop requested.");
    Ok(())
}
