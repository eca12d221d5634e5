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

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::info;

use super::{AudioError, RenderCallback, StreamSpec};

#[derive(Default)]
struct State {
    written: Vec<i16>,
    blocks_written: usize,
    render: Option<RenderCallback>,
    last_spec: Option<StreamSpec>,
    open_streams: usize,
    failed: bool,
}

/// A mock device. Doesn't play anything: pushed samples are captured and pulled streams
/// are rendered on demand with [Device::pull].
#[derive(Clone)]
pub struct Device {
    name: String,
    state: Arc<Mutex<State>>,
}

impl Device {
    /// Gets the given mock device. Devices named "mock-fail..." refuse to open streams.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Every sample written to push streams so far.
    pub fn written(&self) -> Vec<i16> {
        self.state.lock().written.clone()
    }

    pub fn blocks_written(&self) -> usize {
        self.state.lock().blocks_written
    }

    /// The number of streams that are open right now.
    pub fn open_streams(&self) -> usize {
        self.state.lock().open_streams
    }

    /// The spec of the most recently opened stream.
    pub fn last_spec(&self) -> Option<StreamSpec> {
        self.state.lock().last_spec
    }

    /// Makes open streams report a device failure.
    pub fn fail(&self) {
        self.state.lock().failed = true;
    }

    /// Renders `frames` samples from the open pull stream, as the device's callback would.
    /// Returns None when no pull stream is open.
    pub fn pull(&self, frames: usize) -> Option<Vec<i16>> {
        let mut state = self.state.lock();
        let render = state.render.as_mut()?;
        let mut block = vec![0; frames];
        render(&mut block);
        Some(block)
    }

    fn open(&self, spec: StreamSpec) -> Result<(), AudioError> {
        if self.name.starts_with("mock-fail") {
            return Err(AudioError::Build(format!("{} refuses to open", self.name)));
        }
        let mut state = self.state.lock();
        state.last_spec = Some(spec);
        state.open_streams += 1;
        info!(device = self.name, spec = %spec, "Opened mock stream.");
        Ok(())
    }
}

impl super::Device for Device {
    fn open_push(&self, spec: StreamSpec) -> Result<Box<dyn super::PushStream>, AudioError> {
        self.open(spec)?;
        Ok(Box::new(PushStream {
            state: self.state.clone(),
        }))
    }

    fn open_pull(
        &self,
        spec: StreamSpec,
        render: RenderCallback,
    ) -> Result<Box<dyn super::PullStream>, AudioError> {
        self.open(spec)?;
        self.state.lock().render = Some(render);
        Ok(Box::new(PullStream {
            state: self.state.clone(),
        }))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct PushStream {
    state: Arc<Mutex<State>>,
}

impl super::PushStream for PushStream {
    fn write(&mut self, block: &[i16]) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.failed {
            return Err(AudioError::Closed);
        }
        state.written.extend_from_slice(block);
        state.blocks_written += 1;
        Ok(())
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.state.lock().open_streams -= 1;
    }
}

struct PullStream {
    state: Arc<Mutex<State>>,
}

impl super::PullStream for PullStream {
    fn health(&self) -> Result<(), AudioError> {
        if self.state.lock().failed {
            return Err(AudioError::Play("mock device failure".to_string()));
        }
        Ok(())
    }
}

impl Drop for PullStream {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.render = None;
        state.open_streams -= 1;
    }
}
