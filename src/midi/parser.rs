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

//! A resynchronizing decoder for MIDI channel messages arriving over a raw link.
//!
//! The link has no framing of its own: bytes can be dropped or shifted at any point.
//! The parser only trusts a status byte at the head of its buffer. Anything else is
//! skipped a single byte at a time until a status byte lines up again.

use std::sync::Arc;

use midly::num::{u4, u7};
use tracing::trace;

use super::MidiEvent;
use crate::stats::Stats;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;

/// Attempts to decode one message from the head of `buf`.
///
/// Returns the event, if any, and how many bytes to consume:
/// - `(Some(event), n)`: a complete message of `n` bytes.
/// - `(None, 1)`: the head byte can't start a message and must be dropped.
/// - `(None, 0)`: the head looks like a message that hasn't fully arrived yet.
pub fn parse_message(buf: &[u8]) -> (Option<MidiEvent>, usize) {
    let Some(&status) = buf.first() else {
        return (None, 0);
    };
    if !(0x80..=0xEF).contains(&status) {
        return (None, 1);
    }

    let len = match status & 0xF0 {
        NOTE_OFF | NOTE_ON | CONTROL_CHANGE => 3,
        PROGRAM_CHANGE => 2,
        // Pressure and pitch bend are valid MIDI but not something we play.
        _ => return (None, 1),
    };

    // A data byte with the top bit set means the status byte wasn't really the
    // start of a message.
    if buf[1..len.min(buf.len())].iter().any(|&byte| byte > 0x7F) {
        return (None, 1);
    }
    if buf.len() < len {
        return (None, 0);
    }

    let channel = u4::from(status & 0x0F);
    let data1 = u7::from(buf[1]);
    let event = match status & 0xF0 {
        NOTE_ON if buf[2] == 0 => MidiEvent::NoteOff {
            channel,
            note: data1,
        },
        NOTE_ON => MidiEvent::NoteOn {
            channel,
            note: data1,
            velocity: u7::from(buf[2]),
        },
        NOTE_OFF => MidiEvent::NoteOff {
            channel,
            note: data1,
        },
        CONTROL_CHANGE => MidiEvent::ControlChange {
            channel,
            controller: data1,
            value: u7::from(buf[2]),
        },
        _ => MidiEvent::ProgramChange {
            channel,
            program: data1,
        },
    };
    (Some(event), len)
}

/// Owns the ingestion-side byte buffer and turns it into events.
pub struct MidiStreamParser {
    buffer: Vec<u8>,
    /// Index of the first unconsumed byte in `buffer`.
    head: usize,
    stats: Arc<Stats>,
}

impl Default for MidiStreamParser {
    fn default() -> Self {
        MidiStreamParser::new(Arc::default())
    }
}

impl MidiStreamParser {
    pub fn new(stats: Arc<Stats>) -> MidiStreamParser {
        MidiStreamParser {
            buffer: Vec::with_capacity(1024),
            head: 0,
            stats,
        }
    }

    /// Appends bytes received from the link.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.head > 0 {
            self.buffer.drain(..self.head);
            self.head = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.head
    }

    /// Decodes the next event, skipping garbage along the way. Returns None once the
    /// buffer is empty or holds only the start of an incomplete message.
    pub fn next_event(&mut self) -> Option<MidiEvent> {
        loop {
            match parse_message(&self.buffer[self.head..]) {
                (Some(event), consumed) => {
                    self.head += consumed;
                    self.record(&event);
                    return Some(event);
                }
                (None, 0) => return None,
                (None, skipped) => {
                    trace!(
                        byte = format!("{:#04x}", self.buffer[self.head]),
                        "Skipping unrecognized byte."
                    );
                    self.head += skipped;
                    self.stats.record_garbage_byte();
                }
            }
        }
    }

    fn record(&self, event: &MidiEvent) {
        match event {
            MidiEvent::NoteOn { .. } => self.stats.record_note_on(),
            MidiEvent::NoteOff { .. } => self.stats.record_note_off(),
            MidiEvent::ControlChange { .. } => self.stats.record_control_change(),
            MidiEvent::ProgramChange { .. } => self.stats.record_program_change(),
        }
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn note_on(channel: u8, note: u8, velocity: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: u4::from(channel),
            note: u7::from(note),
            velocity: u7::from(velocity),
        }
    }

    fn note_off(channel: u8, note: u8) -> MidiEvent {
        MidiEvent::NoteOff {
            channel: u4::from(channel),
            note: u7::from(note),
        }
    }

    fn drain(parser: &mut MidiStreamParser) -> Vec<MidiEvent> {
        let mut events = Vec::new();
        while let Some(event) = parser.next_event() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_parse_each_message_kind() {
        assert_eq!(
            parse_message(&[0x93, 60, 100]),
            (Some(note_on(3, 60, 100)), 3)
        );
        assert_eq!(parse_message(&[0x80, 60, 64]), (Some(note_off(0, 60)), 3));
        assert_eq!(
            parse_message(&[0xB1, 7, 90]),
            (
                Some(MidiEvent::ControlChange {
                    channel: u4::from(1),
                    controller: u7::from(7),
                    value: u7::from(90),
                }),
                3
            )
        );
        assert_eq!(
            parse_message(&[0xC4, 12, 0x90]),
            (
                Some(MidiEvent::ProgramChange {
                    channel: u4::from(4),
                    program: u7::from(12),
                }),
                2
            )
        );
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        assert_eq!(parse_message(&[0x95, 64, 0]), (Some(note_off(5, 64)), 3));
    }

    #[test]
    fn test_incomplete_message_consumes_nothing() {
        assert_eq!(parse_message(&[]), (None, 0));
        assert_eq!(parse_message(&[0x90]), (None, 0));
        assert_eq!(parse_message(&[0x90, 60]), (None, 0));
        assert_eq!(parse_message(&[0xC0]), (None, 0));
    }

    #[test]
    fn test_garbage_drops_one_byte() {
        assert_eq!(parse_message(&[0x3C, 0x90, 60, 100]), (None, 1));
        assert_eq!(parse_message(&[0xF8, 0x90, 60, 100]), (None, 1));
        assert_eq!(parse_message(&[0xFF]), (None, 1));
        // Pitch bend and pressure are skipped like any other unknown byte.
        assert_eq!(parse_message(&[0xE0, 0x00, 0x40]), (None, 1));
        assert_eq!(parse_message(&[0xA0, 0x40, 0x40]), (None, 1));
        assert_eq!(parse_message(&[0xD0, 0x40]), (None, 1));
        // A status byte followed by another status byte is misaligned.
        assert_eq!(parse_message(&[0x90, 0x90, 60, 100]), (None, 1));
        assert_eq!(parse_message(&[0x90, 0x90]), (None, 1));
    }

    #[test]
    fn test_stream_resynchronizes_after_lost_byte() {
        let stats = Arc::new(Stats::default());
        let mut parser = MidiStreamParser::new(stats.clone());
        // The first note on lost its status byte; its data bytes are garbage.
        parser.push(&[60, 100, 0x91, 62, 90, 0x81, 62, 0]);

        assert_eq!(
            drain(&mut parser),
            vec![note_on(1, 62, 90), note_off(1, 62)]
        );
        assert_eq!(parser.pending(), 0);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.garbage_bytes, 2);
        assert_eq!(snapshot.note_ons, 1);
        assert_eq!(snapshot.note_offs, 1);
    }

    #[test]
    fn test_status_in_data_position_restarts_the_message() {
        // A note on cut short by a new status byte is dropped, not emitted with an
        // out-of-range velocity.
        let stats = Arc::new(Stats::default());
        let mut parser = MidiStreamParser::new(stats.clone());
        parser.push(&[0x90, 0x3C, 0x90, 0x3C, 0x64]);

        assert_eq!(drain(&mut parser), vec![note_on(0, 60, 100)]);
        assert_eq!(stats.snapshot().garbage_bytes, 2);
        assert_eq!(parse_message(&[0x90, 0x3C, 0xC8]), (None, 1));
        assert_eq!(parse_message(&[0xB0, 0x80, 0x00]), (None, 1));
    }

    #[test]
    fn test_message_split_across_pushes() {
        let mut parser = MidiStreamParser::default();
        parser.push(&[0x90]);
        assert_eq!(parser.next_event(), None);
        parser.push(&[69]);
        assert_eq!(parser.next_event(), None);
        assert_eq!(parser.pending(), 2);
        parser.push(&[127, 0xC0]);
        assert_eq!(parser.next_event(), Some(note_on(0, 69, 127)));
        assert_eq!(parser.next_event(), None);
        parser.push(&[3]);
        assert_eq!(
            parser.next_event(),
            Some(MidiEvent::ProgramChange {
                channel: u4::from(0),
                program: u7::from(3),
            })
        );
    }

    #[test]
    fn test_encoded_events_round_trip_through_noise() {
        let events = vec![
            note_on(0, 60, 100),
            MidiEvent::ControlChange {
                channel: u4::from(2),
                controller: u7::from(123),
                value: u7::from(0),
            },
            note_off(15, 60),
        ];
        let mut parser = MidiStreamParser::default();
        for event in &events {
            parser.push(&[0xF8, 0x01]);
            parser.push(&event.to_bytes());
        }

        assert_eq!(drain(&mut parser), events);
    }

    #[test]
    fn test_arbitrary_bytes_only_yield_supported_events() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let len = rng.gen_range(0..256);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let stats = Arc::new(Stats::default());
            let mut parser = MidiStreamParser::new(stats.clone());
            // Feed in random fragments to exercise buffering.
            let mut rest = &bytes[..];
            let mut events = Vec::new();
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(7));
                parser.push(&rest[..take]);
                rest = &rest[take..];
                while let Some(event) = parser.next_event() {
                    events.push(event);
                }
            }

            for event in &events {
                assert!(event.channel().as_int() <= 15);
                let encoded = event.to_bytes();
                assert!(matches!(encoded[0] & 0xF0, 0x80 | 0x90 | 0xB0 | 0xC0));
            }

            // Whatever is left over must be the start of a message that is still
            // arriving, which is never longer than a full message.
            assert!(parser.pending() < 3);
            if let Some(&head) = bytes.get(bytes.len() - parser.pending()) {
                if parser.pending() > 0 {
                    assert!(matches!(head & 0xF0, 0x80 | 0x90 | 0xB0 | 0xC0));
                }
            }

            let snapshot = stats.snapshot();
            let decoded = snapshot.note_ons
                + snapshot.note_offs
                + snapshot.control_changes
                + snapshot.program_changes;
            assert_eq!(decoded as usize, events.len());
        }
    }
}
