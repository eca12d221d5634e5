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
use std::{
    collections::VecDeque,
    fmt,
    fs::File,
    io::{self, Read},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, error};

use super::LinkError;

/// Size of each read issued by the reader thread.
const READ_CHUNK_SIZE: usize = 4096;

/// How many chunks may be queued before the reader thread stops reading and
/// lets the kernel buffer fill instead.
const MAX_QUEUED_CHUNKS: usize = 1024;

/// A link backed by anything readable: a serial device node, a FIFO or stdin.
///
/// Blocking reads happen on a dedicated thread that forwards chunks over a bounded
/// channel, so [`super::ByteSource::read`] never waits longer than its timeout. The
/// reader thread ends, and drops the underlying handle, at the first read after the
/// source is dropped or when the stream reaches EOF.
pub struct StreamSource {
    name: String,
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: VecDeque<u8>,
    disconnected: bool,
    failure: Option<io::Error>,
}

impl StreamSource {
    /// Opens the given path for reading.
    pub fn open(path: &str) -> Result<StreamSource, LinkError> {
        let file = File::open(path).map_err(|source| LinkError::Open {
            path: path.to_string(),
            source,
        })?;
        Ok(StreamSource::from_reader(path, file))
    }

    /// Reads the link from standard input.
    pub fn stdin() -> StreamSource {
        StreamSource::from_reader("stdin", io::stdin())
    }

    /// Wraps a reader, moving it onto its own reader thread.
    pub fn from_reader<R: Read + Send + 'static>(name: &str, mut reader: R) -> StreamSource {
        let (tx, rx) = crossbeam_channel::bounded(MAX_QUEUED_CHUNKS);
        let thread_name = name.to_string();
        thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                let result = match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!(link = thread_name, "Link reached end of stream.");
                        return;
                    }
                    Ok(count) => Ok(buf[..count].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!(link = thread_name, err = %e, "Error reading from link.");
                        Err(e)
                    }
                };
                let failed = result.is_err();
                if tx.send(result).is_err() || failed {
                    return;
                }
            }
        });

        StreamSource {
            name: name.to_string(),
            chunks: rx,
            pending: VecDeque::new(),
            disconnected: false,
            failure: None,
        }
    }

    /// Moves a received chunk into the pending buffer.
    fn accept(&mut self, chunk: io::Result<Vec<u8>>) {
        match chunk {
            Ok(bytes) => self.pending.extend(bytes),
            Err(e) => {
                self.failure = Some(e);
                self.disconnected = true;
            }
        }
    }

    /// Pulls every chunk that has already arrived without waiting.
    fn drain_ready(&mut self) {
        while !self.disconnected {
            match self.chunks.try_recv() {
                Ok(chunk) => self.accept(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.disconnected = true,
            }
        }
    }

    /// Returns the terminal error for a drained, disconnected link.
    fn terminal_error(&mut self) -> LinkError {
        match self.failure.take() {
            Some(e) => LinkError::Io(e),
            None => LinkError::Closed,
        }
    }
}

impl super::ByteSource for StreamSource {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.drain_ready();
        if self.pending.is_empty() && !self.disconnected {
            match self.chunks.recv_timeout(timeout) {
                Ok(chunk) => {
                    self.accept(chunk);
                    self.drain_ready();
                }
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => self.disconnected = true,
            }
        }

        if self.pending.is_empty() {
            return if self.disconnected {
                Err(self.terminal_error())
            } else {
                Ok(0)
            };
        }

        let count = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *dst = src;
        }
        Ok(count)
    }

    fn bytes_available(&mut self) -> usize {
        self.drain_ready();
        self.pending.len()
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
