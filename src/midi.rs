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
use midly::{
    live::LiveEvent,
    num::{u4, u7},
    MidiMessage,
};

mod parser;

pub use parser::{parse_message, MidiStreamParser};

/// The channel messages the receiver understands. Anything else on the link is
/// treated as garbage by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u4, note: u7, velocity: u7 },
    NoteOff { channel: u4, note: u7 },
    ControlChange {
        channel: u4,
        controller: u7,
        value: u7,
    },
    ProgramChange { channel: u4, program: u7 },
}

impl MidiEvent {
    /// Returns the channel the event was sent on.
    pub fn channel(&self) -> u4 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => channel,
        }
    }

    /// Converts the event into its standard live form.
    pub fn to_live_event(&self) -> LiveEvent<'static> {
        let (channel, message) = match *self {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => (
                channel,
                MidiMessage::NoteOn {
                    key: note,
                    vel: velocity,
                },
            ),
            MidiEvent::NoteOff { channel, note } => (
                channel,
                MidiMessage::NoteOff {
                    key: note,
                    vel: u7::from(0),
                },
            ),
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => (channel, MidiMessage::Controller { controller, value }),
            MidiEvent::ProgramChange { channel, program } => {
                (channel, MidiMessage::ProgramChange { program })
            }
        };
        LiveEvent::Midi { channel, message }
    }

    /// Encodes the event as it would appear on the link.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(3);
        // Writing into a Vec can't fail.
        let _ = self.to_live_event().write(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_to_bytes() {
        let note_on = MidiEvent::NoteOn {
            channel: u4::from(1),
            note: u7::from(60),
            velocity: u7::from(100),
        };
        assert_eq!(note_on.to_bytes(), vec![0x91, 60, 100]);

        let note_off = MidiEvent::NoteOff {
            channel: u4::from(0),
            note: u7::from(60),
        };
        assert_eq!(note_off.to_bytes(), vec![0x80, 60, 0]);

        let cc = MidiEvent::ControlChange {
            channel: u4::from(15),
            controller: u7::from(7),
            value: u7::from(127),
        };
        assert_eq!(cc.to_bytes(), vec![0xBF, 7, 127]);

        let pc = MidiEvent::ProgramChange {
            channel: u4::from(2),
            program: u7::from(5),
        };
        assert_eq!(pc.to_bytes(), vec![0xC2, 5]);
    }

    #[test]
    fn test_channel() {
        let event = MidiEvent::ControlChange {
            channel: u4::from(9),
            controller: u7::from(123),
            value: u7::from(0),
        };
        assert_eq!(event.channel().as_int(), 9);
    }
}
