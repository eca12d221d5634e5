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
use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

/// Represents the current stop state.
#[derive(PartialEq, Clone, Copy)]
enum StopState {
    Running,
    Stopped,
}

/// A stop handle is shared between the receive loops and whoever wants the session to
/// end. Every loop level checks it and unwinds.
#[derive(Clone)]
pub struct StopHandle {
    /// Set to Stopped once a stop has been requested.
    state: Arc<Mutex<StopState>>,
    /// Wakes up anyone sleeping in wait_timeout.
    condvar: Arc<Condvar>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    /// Creates a new stop handle.
    pub fn new() -> StopHandle {
        StopHandle {
            state: Arc::new(Mutex::new(StopState::Running)),
            condvar: Arc::new(Condvar::new()),
        }
    }

    /// Returns true if a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.state.lock() == StopState::Stopped
    }

    /// Requests a stop. Repeated requests are ignored.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == StopState::Running {
            *state = StopState::Stopped;
            self.condvar.notify_all();
        }
    }

    /// Sleeps for at most the given duration, returning early if a stop is requested.
    /// Returns true if the handle is stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state == StopState::Running {
            let _ = self.condvar.wait_while_for(
                &mut state,
                |state| *state == StopState::Running,
                timeout,
            );
        }
        *state == StopState::Stopped
    }
}
