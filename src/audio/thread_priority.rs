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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the render callback thread when LINKSYNTH_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

/// Reads LINKSYNTH_THREAD_PRIORITY (0-99) once, when the stream is built, so the
/// callback never touches the environment.
pub fn callback_thread_priority() -> Option<ThreadPriorityValue> {
    let priority = std::env::var("LINKSYNTH_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(priority).ok()
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to try SCHED_FIFO for the render callback. On unless LINKSYNTH_DISABLE_RT_AUDIO is set.
pub fn rt_audio_enabled() -> bool {
    !env_flag("LINKSYNTH_DISABLE_RT_AUDIO")
}

/// Raises the calling thread's priority the first time it's called for a stream.
pub fn configure_audio_thread_priority(
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    *priority_set = true;

    let Some(priority) = priority else {
        return;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        match set_thread_priority_and_policy(
            thread_native_id(),
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for render callback thread."),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for render callback thread."),
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;
}

#[cfg(test)]
mod test {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_priority_from_env() {
        std::env::set_var("LINKSYNTH_THREAD_PRIORITY", "42");
        assert_eq!(
            callback_thread_priority(),
            ThreadPriorityValue::try_from(42u8).ok()
        );

        std::env::set_var("LINKSYNTH_THREAD_PRIORITY", "150");
        assert_eq!(
            callback_thread_priority(),
            ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).ok()
        );

        std::env::set_var("LINKSYNTH_THREAD_PRIORITY", "loud");
        assert_eq!(
            callback_thread_priority(),
            ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).ok()
        );

        std::env::remove_var("LINKSYNTH_THREAD_PRIORITY");
        assert!(callback_thread_priority().is_some());
    }

    #[test]
    #[serial]
    fn test_rt_audio_flag() {
        std::env::remove_var("LINKSYNTH_DISABLE_RT_AUDIO");
        assert!(rt_audio_enabled());

        for value in ["1", "true", "YES", "on"] {
            std::env::set_var("LINKSYNTH_DISABLE_RT_AUDIO", value);
            assert!(!rt_audio_enabled());
        }

        std::env::set_var("LINKSYNTH_DISABLE_RT_AUDIO", "0");
        assert!(rt_audio_enabled());
        std::env::remove_var("LINKSYNTH_DISABLE_RT_AUDIO");
    }

    #[test]
    fn test_configure_runs_once() {
        let mut priority_set = false;
        configure_audio_thread_priority(None, false, &mut priority_set);
        assert!(priority_set);
        configure_audio_thread_priority(None, false, &mut priority_set);
        assert!(priority_set);
    }
}
