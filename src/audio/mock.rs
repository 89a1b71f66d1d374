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
#[cfg(test)]
use std::error::Error;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use tracing::info;

use crate::audio::{format, DeviceError, LockedRegion, PlaybackBuffer};
use crate::playsync::{Notifications, WaitOutcome};

/// A mock device. Doesn't actually play anything, but simulates the playback
/// cursor so the refill loop runs against it in real time.
#[derive(Clone)]
pub struct Device {
    name: String,
    last_buffer: Arc<Mutex<Option<Arc<Buffer>>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            last_buffer: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the most recently created buffer.
    #[cfg(test)]
    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        self.last_buffer.lock().expect("Error getting lock").clone()
    }
}

impl crate::audio::Device for Device {
    fn create_buffer(&self, capacity: usize) -> Result<Arc<dyn PlaybackBuffer>, DeviceError> {
        if capacity == 0 || capacity % 2 != 0 {
            return Err(DeviceError::Configuration(format!(
                "invalid buffer capacity {}",
                capacity
            )));
        }

        let buffer = Arc::new(Buffer {
            samples: Mutex::new(vec![0i16; capacity / 2].into_boxed_slice()),
            capacity,
            registration: Mutex::new(None),
            playing: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            lock_log: Mutex::new(Vec::new()),
            forced_split: Mutex::new(None),
            simulation: Mutex::new(None),
        });

        *self.last_buffer.lock().expect("Error getting lock") = Some(buffer.clone());
        Ok(buffer)
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct Registration {
    offsets: Vec<usize>,
    events: Arc<Notifications>,
}

struct Simulation {
    stop_tx: mpsc::Sender<()>,
    join_handle: thread::JoinHandle<()>,
}

/// An in-memory playback buffer. Lock acquisitions are logged, notifications
/// can be signaled by hand, and `play_looping` starts a thread that walks the
/// registered boundaries at the rate the fixed format would be consumed.
pub struct Buffer {
    samples: Mutex<Box<[i16]>>,
    capacity: usize,
    registration: Mutex<Option<Registration>>,
    playing: AtomicBool,
    abandoned: AtomicBool,
    lock_log: Mutex<Vec<(usize, usize)>>,
    forced_split: Mutex<Option<usize>>,
    simulation: Mutex<Option<Simulation>>,
}

impl PlaybackBuffer for Buffer {
    fn lock(&self, offset: usize, len: usize) -> Result<LockedRegion<'_>, DeviceError> {
        self.lock_log
            .lock()
            .expect("Error getting lock")
            .push((offset, len));

        let guard = self.samples.lock().map_err(|_| DeviceError::Lock {
            offset,
            len,
            reason: "buffer storage poisoned".to_string(),
        })?;
        let split = *self.forced_split.lock().expect("Error getting lock");
        LockedRegion::new(guard, offset, len, split)
    }

    fn set_notification_positions(&self, offsets: &[usize]) -> Result<(), DeviceError> {
        if offsets.is_empty() {
            return Err(DeviceError::Notification(
                "no notification positions given".to_string(),
            ));
        }
        for offset in offsets {
            if *offset >= self.capacity {
                return Err(DeviceError::Notification(format!(
                    "notification offset {} exceeds capacity {}",
                    offset, self.capacity
                )));
            }
        }

        let mut registration = self.registration.lock().expect("Error getting lock");
        if registration.is_some() {
            return Err(DeviceError::Notification(
                "notification positions already registered".to_string(),
            ));
        }

        *registration = Some(Registration {
            offsets: offsets.to_vec(),
            events: Arc::new(Notifications::new(offsets.len())),
        });
        Ok(())
    }

    fn play_looping(&self) -> Result<(), DeviceError> {
        if self.playing.swap(true, Ordering::Relaxed) {
            return Err(DeviceError::Stream("already playing".to_string()));
        }

        info!(capacity = self.capacity, "Playing (mock).");

        // Walk the registered boundaries at the consumption rate of the
        // fixed format, firing each event as the simulated cursor reaches it.
        let registration = self.registration.lock().expect("Error getting lock");
        if let Some(registration) = registration.as_ref() {
            let offsets = registration.offsets.clone();
            let events = registration.events.clone();
            let capacity = self.capacity;
            let (stop_tx, stop_rx) = mpsc::channel::<()>();

            let join_handle = thread::spawn(move || {
                let mut index = 0;
                loop {
                    events.signal(index);

                    let next = (index + 1) % offsets.len();
                    let distance =
                        (offsets[next] + capacity - offsets[index]) % capacity;
                    let segment = Duration::from_secs_f64(
                        distance.max(1) as f64 / format::BYTES_PER_SEC as f64,
                    );

                    match stop_rx.recv_timeout(segment) {
                        Err(mpsc::RecvTimeoutError::Timeout) => index = next,
                        _ => return,
                    }
                }
            });

            *self.simulation.lock().expect("Error getting lock") = Some(Simulation {
                stop_tx,
                join_handle,
            });
        }

        Ok(())
    }

    fn wait_notification(&self, timeout: Option<Duration>) -> WaitOutcome {
        if self.abandoned.load(Ordering::Relaxed) {
            return WaitOutcome::Abandoned;
        }

        let events = {
            let registration = self.registration.lock().expect("Error getting lock");
            match registration.as_ref() {
                Some(registration) => registration.events.clone(),
                None => return WaitOutcome::Abandoned,
            }
        };
        events.wait(timeout)
    }
}

impl Buffer {
    /// Fires the notification event with the given index by hand.
    #[cfg(test)]
    pub fn signal(&self, index: usize) {
        let registration = self.registration.lock().expect("Error getting lock");
        if let Some(registration) = registration.as_ref() {
            registration.events.signal(index);
        }
    }

    /// Abandons the buffer: waits return `Abandoned` from now on.
    #[cfg(test)]
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Relaxed);
        let registration = self.registration.lock().expect("Error getting lock");
        if let Some(registration) = registration.as_ref() {
            registration.events.abandon();
        }
    }

    /// All lock acquisitions so far, as (byte offset, byte length) pairs.
    #[cfg(test)]
    pub fn locks(&self) -> Vec<(usize, usize)> {
        self.lock_log.lock().expect("Error getting lock").clone()
    }

    /// Forces subsequent locks to come back segmented at the given byte
    /// offset within the region.
    #[cfg(test)]
    pub fn force_split(&self, split: Option<usize>) {
        *self.forced_split.lock().expect("Error getting lock") = split;
    }

    /// A snapshot of the buffer contents.
    #[cfg(test)]
    pub fn contents(&self) -> Vec<i16> {
        self.samples.lock().expect("Error getting lock").to_vec()
    }

    /// Returns true if the buffer is currently playing.
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Stop playback, then release the notification interface, then the
        // storage goes with the struct.
        let simulation = self.simulation.lock().expect("Error getting lock").take();
        if let Some(simulation) = simulation {
            drop(simulation.stop_tx);
            let _ = simulation.join_handle.join();
        }

        let registration = self.registration.lock().expect("Error getting lock").take();
        if let Some(registration) = registration {
            registration.events.abandon();
        }
    }
}
