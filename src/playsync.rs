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
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// The result of waiting on a notification set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The event with the given index fired.
    Signaled(usize),
    /// The notification set was abandoned (the buffer behind it went away).
    Abandoned,
    /// The wait expired before any event fired.
    TimedOut,
}

struct NotifyState {
    /// One pending flag per event. Events are auto-reset: a successful wait
    /// consumes the flag it observed.
    signaled: Vec<bool>,
    abandoned: bool,
}

/// A set of signalable events that can be waited on as a group.
///
/// A waiter blocks until any event fires and learns which one; the lowest
/// pending index wins when several are pending. Abandonment takes precedence
/// over pending signals so that a waiter never acts on a signal from a buffer
/// that has already been torn down.
pub struct Notifications {
    state: Mutex<NotifyState>,
    condvar: Condvar,
}

impl Notifications {
    /// Creates a notification set with `count` events, none pending.
    pub fn new(count: usize) -> Notifications {
        Notifications {
            state: Mutex::new(NotifyState {
                signaled: vec![false; count],
                abandoned: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// The number of events in the set.
    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.state.lock().expect("Error getting lock").signaled.len()
    }

    /// Marks the event with the given index as pending and wakes waiters.
    /// Signals for indexes outside the set are ignored.
    pub fn signal(&self, index: usize) {
        let mut state = self.state.lock().expect("Error getting lock");
        if index < state.signaled.len() {
            state.signaled[index] = true;
            self.condvar.notify_all();
        }
    }

    /// Abandons the set. All current and future waits return
    /// [`WaitOutcome::Abandoned`], regardless of pending signals.
    pub fn abandon(&self) {
        let mut state = self.state.lock().expect("Error getting lock");
        state.abandoned = true;
        self.condvar.notify_all();
    }

    /// Returns true if the set has been abandoned.
    #[cfg(test)]
    pub fn is_abandoned(&self) -> bool {
        self.state.lock().expect("Error getting lock").abandoned
    }

    /// Blocks until an event fires, the set is abandoned, or the timeout
    /// elapses. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut state = self.state.lock().expect("Error getting lock");

        loop {
            if state.abandoned {
                return WaitOutcome::Abandoned;
            }
            if let Some(index) = state.signaled.iter().position(|pending| *pending) {
                state.signaled[index] = false;
                return WaitOutcome::Signaled(index);
            }

            state = match timeout {
                Some(timeout) => {
                    let (mut state, result) = self
                        .condvar
                        .wait_timeout(state, timeout)
                        .expect("Error getting lock");
                    if result.timed_out() {
                        if state.abandoned {
                            return WaitOutcome::Abandoned;
                        }
                        if let Some(index) = state.signaled.iter().position(|pending| *pending) {
                            state.signaled[index] = false;
                            return WaitOutcome::Signaled(index);
                        }
                        return WaitOutcome::TimedOut;
                    }
                    state
                }
                None => self.condvar.wait(state).expect("Error getting lock"),
            };
        }
    }
}
