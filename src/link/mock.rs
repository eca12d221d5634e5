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
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

use super::LinkError;

struct State {
    pending: VecDeque<u8>,
    closed: bool,
    reads: usize,
}

/// A scripted link. Bytes are queued with [`ByteSource::push`] and handed out on
/// read; clones share the same queue so a test can feed a link another thread owns.
#[derive(Clone)]
pub struct ByteSource {
    name: String,
    state: Arc<Mutex<State>>,
    arrived: Arc<Condvar>,
    /// Caps the bytes returned by a single read, to mimic a fragmented link.
    max_read: Option<usize>,
}

impl ByteSource {
    /// Creates an empty, open mock link.
    pub fn new(name: &str) -> ByteSource {
        ByteSource {
            name: name.to_string(),
            state: Arc::new(Mutex::new(State {
                pending: VecDeque::new(),
                closed: false,
                reads: 0,
            })),
            arrived: Arc::new(Condvar::new()),
            max_read: None,
        }
    }

    /// Creates a mock link that already holds the given bytes.
    pub fn with_bytes(name: &str, bytes: &[u8]) -> ByteSource {
        let source = ByteSource::new(name);
        source.push(bytes);
        source
    }

    /// Limits how many bytes a single read may return.
    pub fn with_max_read(mut self, max_read: usize) -> ByteSource {
        self.max_read = Some(max_read.max(1));
        self
    }

    /// Queues bytes as if they had just arrived on the link.
    pub fn push(&self, bytes: &[u8]) {
        self.state.lock().pending.extend(bytes.iter().copied());
        self.arrived.notify_all();
    }

    /// Closes the link. Queued bytes can still be read.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.arrived.notify_all();
    }

    /// Returns the number of bytes that have not been read yet.
    pub fn remaining(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns how many reads have been issued against the link.
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }
}

impl super::ByteSource for ByteSource {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        let mut state = self.state.lock();
        state.reads += 1;
        if state.pending.is_empty() && !state.closed && !timeout.is_zero() {
            let _ = self.arrived.wait_while_for(
                &mut state,
                |state| state.pending.is_empty() && !state.closed,
                timeout,
            );
        }

        if state.pending.is_empty() {
            return if state.closed {
                Err(LinkError::Closed)
            } else {
                Ok(0)
            };
        }

        let limit = self.max_read.unwrap_or(usize::MAX);
        let count = buf.len().min(state.pending.len()).min(limit);
        for (dst, src) in buf.iter_mut().zip(state.pending.drain(..count)) {
            *dst = src;
        }
        Ok(count)
    }

    fn bytes_available(&mut self) -> usize {
        self.state.lock().pending.len()
    }
}

impl fmt::Display for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use std::{thread, time::Instant};

    use super::*;
    use crate::link::ByteSource as _;

    #[test]
    fn test_fragmented_reads() {
        let mut source = ByteSource::with_bytes("mock", &[1, 2, 3, 4, 5]).with_max_read(2);
        let mut buf = [0u8; 8];

        assert_eq!(source.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(source.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(source.read(&mut buf, Duration::ZERO).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(source.read(&mut buf, Duration::ZERO).unwrap(), 0);
        assert_eq!(source.reads(), 4);
    }

    #[test]
    fn test_closed_after_drain() {
        let mut source = ByteSource::with_bytes("mock", &[7]);
        source.close();
        let mut buf = [0u8; 4];

        assert_eq!(source.read(&mut buf, Duration::ZERO).unwrap(), 1);
        assert!(matches!(
            source.read(&mut buf, Duration::ZERO),
            Err(LinkError::Closed)
        ));
    }

    #[test]
    fn test_read_wakes_on_push() {
        let mut source = ByteSource::new("mock");
        let feeder = source.clone();
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.push(&[0xAA]);
        });

        let start = Instant::now();
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf, Duration::from_secs(5)).unwrap(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(buf[0], 0xAA);
        join.join().unwrap();
    }
}
