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
use std::{fmt, io, time::Duration};

use tracing::info;

pub mod mock;
pub mod stream;

/// Errors raised by a link. A quiet link is not an error: reads that time out
/// simply return zero bytes.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("unable to open link {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("link closed")]
    Closed,

    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The byte-level side of a point-to-point link.
pub trait ByteSource: fmt::Display + Send {
    /// Reads up to `buf.len()` bytes. Waits at most `timeout` for data to arrive and
    /// returns whatever is pending at that point, which may be nothing. Returns
    /// [`LinkError::Closed`] once the link has gone away and every byte has been read.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Returns the number of bytes that can be read right now without waiting.
    fn bytes_available(&mut self) -> usize;

    /// Throws away everything currently pending and returns how many bytes were dropped.
    fn discard_pending(&mut self) -> Result<usize, LinkError> {
        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        while self.bytes_available() > 0 {
            match self.read(&mut scratch, Duration::ZERO) {
                Ok(0) => break,
                Ok(count) => discarded += count,
                Err(LinkError::Closed) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(discarded)
    }
}

/// Opens the link at the given path. "-" reads standard input and anything starting
/// with "mock" opens an empty scripted link.
pub fn open(path: &str) -> Result<Box<dyn ByteSource>, LinkError> {
    if path.starts_with("mock") {
        return Ok(Box::new(mock::ByteSource::new(path)));
    }

    let source = if path == "-" {
        stream::StreamSource::stdin()
    } else {
        stream::StreamSource::open(path)?
    };
    info!(link = path, "Opened link.");
    Ok(Box::new(source))
}
