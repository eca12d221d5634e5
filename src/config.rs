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
use std::path::Path;

mod error;
mod receiver;

pub use error::ConfigError;
pub use receiver::Receiver;

/// Loads the receiver configuration. The file is optional; environment variables
/// prefixed with LINKSYNTH_ override anything it sets.
pub fn load(path: Option<&Path>) -> Result<Receiver, ConfigError> {
    let receiver = match path {
        Some(path) => Receiver::deserialize(path)?,
        None => Receiver::from_env()?,
    };
    receiver.validate()?;
    Ok(receiver)
}
