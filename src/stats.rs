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

//! Counters describing what the receiver has seen and done.
//!
//! A single [`Stats`] is shared between the ingestion loop and the audio callback.
//! Every update is a relaxed atomic add, so it is safe to record from the real-time
//! context. Whoever owns the session decides how to report a [`Snapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Debug)]
pub struct Stats {
    bytes_received: AtomicU64,
    garbage_bytes: AtomicU64,
    note_ons: AtomicU64,
    note_offs: AtomicU64,
    control_changes: AtomicU64,
    program_changes: AtomicU64,
    events_dropped: AtomicU64,
    voices_stolen: AtomicU64,
    samples_decoded: AtomicU64,
    short_reads: AtomicU64,
    noise_samples: AtomicU64,
    blocks_written: AtomicU64,
    callbacks: AtomicU64,
}

/// A point-in-time copy of [`Stats`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub bytes_received: u64,
    pub garbage_bytes: u64,
    pub note_ons: u64,
    pub note_offs: u64,
    pub control_changes: u64,
    pub program_changes: u64,
    pub events_dropped: u64,
    pub voices_stolen: u64,
    pub samples_decoded: u64,
    pub short_reads: u64,
    pub noise_samples: u64,
    pub blocks_written: u64,
    pub callbacks: u64,
}

impl Stats {
    pub fn record_bytes(&self, count: usize) {
        self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_garbage_byte(&self) {
        self.garbage_bytes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_note_on(&self) {
        self.note_ons.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_note_off(&self) {
        self.note_offs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_change(&self) {
        self.control_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_program_change(&self) {
        self.program_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was decoded but could not be handed to the synthesizer in time.
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_voice_stolen(&self) {
        self.voices_stolen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_decoded(&self) {
        self.samples_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// A sample slot was filled with silence because its bytes did not arrive in time.
    pub fn record_short_read(&self) {
        self.short_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// A sample was discarded as line noise.
    pub fn record_noise_sample(&self) {
        self.noise_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_written(&self) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            garbage_bytes: self.garbage_bytes.load(Ordering::Relaxed),
            note_ons: self.note_ons.load(Ordering::Relaxed),
            note_offs: self.note_offs.load(Ordering::Relaxed),
            control_changes: self.control_changes.load(Ordering::Relaxed),
            program_changes: self.program_changes.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            voices_stolen: self.voices_stolen.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            short_reads: self.short_reads.load(Ordering::Relaxed),
            noise_samples: self.noise_samples.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bytes={} garbage={} notes_on={} notes_off={} cc={} pc={} dropped={} stolen={} \
             samples={} short_reads={} noise={} blocks={} callbacks={}",
            self.bytes_received,
            self.garbage_bytes,
            self.note_ons,
            self.note_offs,
            self.control_changes,
            self.program_changes,
            self.events_dropped,
            self.voices_stolen,
            self.samples_decoded,
            self.short_reads,
            self.noise_samples,
            self.blocks_written,
            self.callbacks,
        )
    }
}
