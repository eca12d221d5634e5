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

/// Linearly interpolates `samples` onto `samples.len() * ratio` evenly spaced points
/// spanning the first through the last input sample. Results truncate toward zero.
/// Fewer than two samples can't be interpolated, so each is repeated `ratio` times.
///
/// Each call stands alone: nothing from the previous block's tail is carried over.
pub fn upsample(samples: &[i16], ratio: usize) -> Vec<i16> {
    let mut output = Vec::with_capacity(samples.len() * ratio);
    upsample_into(samples, ratio, &mut output);
    output
}

fn upsample_into(samples: &[i16], ratio: usize, output: &mut Vec<i16>) {
    output.clear();
    if samples.len() < 2 {
        for &sample in samples {
            output.extend(std::iter::repeat(sample).take(ratio));
        }
        return;
    }

    let points = samples.len() * ratio;
    if points == 0 {
        return;
    }
    // Two or more samples at a ratio of at least one give two or more points.
    let last = (samples.len() - 1) as f64;
    let step = last / (points - 1) as f64;

    for i in 0..points {
        let position = if i == points - 1 {
            last
        } else {
            i as f64 * step
        };
        let index = (position.floor() as usize).min(samples.len() - 2);
        let fraction = position - index as f64;
        let left = samples[index] as f64;
        let right = samples[index + 1] as f64;
        output.push((left + (right - left) * fraction) as i16);
    }
}

/// Upsamples block after block into a reused output buffer.
pub struct Resampler {
    ratio: usize,
    output: Vec<i16>,
}

impl Resampler {
    pub fn new(ratio: usize) -> Resampler {
        Resampler {
            ratio,
            output: Vec::new(),
        }
    }

    /// Upsamples a block. The returned slice is valid until the next call.
    pub fn process(&mut self, samples: &[i16]) -> &[i16] {
        upsample_into(samples, self.ratio, &mut self.output);
        &self.output
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }
}
