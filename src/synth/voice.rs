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

//! A single sawtooth voice with an attack/sustain/release envelope.

use std::f32::consts::{PI, TAU};

/// Length of the attack ramp.
const ATTACK_SECONDS: f64 = 0.01;
/// Length of the release ramp, measured from whatever level the release began at.
const RELEASE_SECONDS: f64 = 0.05;
/// Level the envelope is held at once the attack completes.
pub const SUSTAIN_LEVEL: f32 = 0.8;
/// Fixed gain applied to every voice so a full pool doesn't clip immediately.
pub const HEADROOM: f32 = 0.3;

/// Envelope phase of a voice. An inactive voice parked in Release is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Attack,
    Sustain,
    Release,
}

/// Converts a MIDI note number to its equal-tempered frequency, A4 (69) = 440 Hz.
pub fn note_to_frequency(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

#[derive(Debug, Clone)]
pub struct Voice {
    note: u8,
    frequency: f32,
    /// Normalized to [0, 1].
    velocity: f32,
    /// Radians, always within [0, 2π).
    phase: f32,
    /// Always within [0, 1].
    envelope: f32,
    state: EnvelopeState,
    active: bool,
    release_start_level: f32,
    sample_rate: f32,
    attack_step: f32,
    release_samples: f32,
}

impl Voice {
    /// Creates an idle voice for the given output sample rate.
    pub fn new(sample_rate: u32) -> Voice {
        let attack_samples = ((ATTACK_SECONDS * sample_rate as f64) as usize).max(1);
        let release_samples = ((RELEASE_SECONDS * sample_rate as f64) as usize).max(1);
        Voice {
            note: 0,
            frequency: 0.0,
            velocity: 0.0,
            phase: 0.0,
            envelope: 0.0,
            state: EnvelopeState::Release,
            active: false,
            release_start_level: 0.0,
            sample_rate: sample_rate as f32,
            attack_step: 1.0 / attack_samples as f32,
            release_samples: release_samples as f32,
        }
    }

    /// Starts (or restarts) the voice on the given note. Velocity is the raw 0-127 value.
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        self.note = note;
        self.frequency = note_to_frequency(note);
        self.velocity = velocity.min(127) as f32 / 127.0;
        self.state = EnvelopeState::Attack;
        self.envelope = 0.0;
        self.active = true;
    }

    /// Begins the release from the current envelope level. Releasing twice is a no-op.
    pub fn note_off(&mut self) {
        if self.state != EnvelopeState::Release {
            self.release_start_level = self.envelope;
            self.state = EnvelopeState::Release;
        }
    }

    /// Silences the voice immediately without a release.
    pub fn kill(&mut self) {
        self.active = false;
        self.envelope = 0.0;
        self.state = EnvelopeState::Release;
        self.phase = 0.0;
    }

    /// Advances the envelope by one sample.
    fn step_envelope(&mut self) {
        match self.state {
            EnvelopeState::Attack => {
                self.envelope += self.attack_step;
                if self.envelope >= 1.0 {
                    self.envelope = 1.0;
                    self.state = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => self.envelope = SUSTAIN_LEVEL,
            EnvelopeState::Release => {
                self.envelope -= self.release_start_level / self.release_samples;
                if self.envelope <= 0.0 {
                    self.envelope = 0.0;
                    self.active = false;
                }
            }
        }
    }

    /// Produces the next output sample and advances the oscillator and envelope.
    pub fn next_sample(&mut self) -> f32 {
        if self.is_idle() {
            return 0.0;
        }

        self.step_envelope();
        let saw = self.phase / PI - 1.0;
        let sample = saw * self.envelope.max(0.0) * self.velocity * HEADROOM;

        self.phase = (self.phase + TAU * self.frequency / self.sample_rate).rem_euclid(TAU);
        // rem_euclid can round up to exactly TAU for values just below it.
        if self.phase >= TAU {
            self.phase = 0.0;
        }
        sample
    }

    /// Adds this voice's output for `out.len()` samples into `out`.
    pub fn render_add(&mut self, out: &mut [f32]) {
        if self.is_idle() {
            return;
        }
        for sample in out.iter_mut() {
            *sample += self.next_sample();
        }
    }

    /// An idle voice produces nothing until the next note on.
    pub fn is_idle(&self) -> bool {
        !self.active && self.envelope <= 0.0
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn release_start_level(&self) -> f32 {
        self.release_start_level
    }

    /// Number of samples a release from full level takes.
    pub fn release_samples(&self) -> usize {
        self.release_samples as usize
    }
}
