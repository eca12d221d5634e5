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

//! Polyphonic sawtooth synthesizer driven by [MidiEvent]s.
//!
//! The synthesizer is owned by whatever context renders audio. Events are applied
//! between blocks. Nothing here locks or logs, and mixing never allocates.

use std::sync::Arc;

use crate::midi::MidiEvent;
use crate::stats::Stats;

mod voice;

pub use voice::{note_to_frequency, EnvelopeState, Voice, HEADROOM, SUSTAIN_LEVEL};

/// Channel volume controller.
pub const CC_VOLUME: u8 = 7;
/// All notes off. Silences every voice without a release.
pub const CC_ALL_NOTES_OFF: u8 = 123;

pub struct Synthesizer {
    voices: Vec<Voice>,
    volume: f32,
    /// Mixing buffer, sized once to the largest block we expect to render.
    scratch: Vec<f32>,
    stats: Arc<Stats>,
}

impl Synthesizer {
    /// Creates a synthesizer with `max_voices` idle voices. `block_size` sizes the internal
    /// mix buffer; larger requests are rendered in chunks.
    pub fn new(
        sample_rate: u32,
        max_voices: usize,
        block_size: usize,
        stats: Arc<Stats>,
    ) -> Synthesizer {
        Synthesizer {
            voices: (0..max_voices.max(1))
                .map(|_| Voice::new(sample_rate))
                .collect(),
            volume: 0.8,
            scratch: vec![0.0; block_size.max(1)],
            stats,
        }
    }

    /// Sets the starting volume, clamped to [0, 1].
    pub fn with_volume(mut self, volume: f32) -> Synthesizer {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Starts a note on the first inactive voice, stealing the first voice when all are busy.
    /// A velocity of zero is a note off.
    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(note);
            return;
        }

        let index = match self.voices.iter().position(|voice| !voice.is_active()) {
            Some(index) => index,
            None => {
                self.stats.record_voice_stolen();
                0
            }
        };
        self.voices[index].note_on(note, velocity);
    }

    /// Releases every active voice playing the note.
    pub fn note_off(&mut self, note: u8) {
        self.voices
            .iter_mut()
            .filter(|voice| voice.is_active() && voice.note() == note)
            .for_each(Voice::note_off);
    }

    pub fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_VOLUME => self.volume = value.min(127) as f32 / 127.0,
            CC_ALL_NOTES_OFF => self.panic(),
            _ => {}
        }
    }

    /// Single timbre, so program changes are accepted and ignored.
    pub fn program_change(&mut self, _program: u8) {}

    /// Immediately silences every voice.
    pub fn panic(&mut self) {
        self.voices.iter_mut().for_each(Voice::kill);
    }

    /// Applies a decoded event.
    pub fn apply(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { note, velocity, .. } => {
                self.note_on(note.as_int(), velocity.as_int())
            }
            MidiEvent::NoteOff { note, .. } => self.note_off(note.as_int()),
            MidiEvent::ControlChange {
                controller, value, ..
            } => self.control_change(controller.as_int(), value.as_int()),
            MidiEvent::ProgramChange { program, .. } => self.program_change(program.as_int()),
        }
    }

    /// Fills `out` with the mix of all voices, scaled by volume to 16 bit with hard clipping.
    pub fn generate(&mut self, out: &mut [i16]) {
        let chunk_size = self.scratch.len();
        for chunk in out.chunks_mut(chunk_size) {
            let mix = &mut self.scratch[..chunk.len()];
            mix.fill(0.0);
            for voice in self.voices.iter_mut() {
                voice.render_add(mix);
            }
            for (sample, mixed) in chunk.iter_mut().zip(mix.iter()) {
                *sample = (mixed * self.volume * 32767.0).clamp(-32768.0, 32767.0) as i16;
            }
        }
    }

    /// Allocating convenience over [Synthesizer::generate].
    pub fn generate_block(&mut self, frames: usize) -> Vec<i16> {
        let mut block = vec![0; frames];
        self.generate(&mut block);
        block
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_active()).count()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}
