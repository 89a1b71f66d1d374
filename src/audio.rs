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
use std::error::Error;
use std::fmt;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use crate::playsync::WaitOutcome;

pub mod cpal;
pub mod format;
pub mod mock;

/// Errors from the playback backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No output device available: {0}")]
    NoDevice(String),

    #[error("Unsupported stream configuration: {0}")]
    Configuration(String),

    #[error("Failed to lock buffer region (offset {offset}, len {len}): {reason}")]
    Lock {
        offset: usize,
        len: usize,
        reason: String,
    },

    #[error("Notification registration failed: {0}")]
    Notification(String),

    #[error("Playback stream error: {0}")]
    Stream(String),
}

/// An audio output device capable of hosting a circular playback buffer.
pub trait Device: fmt::Display + Send + Sync {
    /// Creates a circular playback buffer with the given byte capacity in the
    /// fixed playback format.
    fn create_buffer(&self, capacity: usize) -> Result<Arc<dyn PlaybackBuffer>, DeviceError>;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// A circular buffer of interleaved 16-bit stereo PCM being consumed by the
/// playback backend while the engine writes into it.
pub trait PlaybackBuffer: Send + Sync {
    /// Acquires exclusive write access to the byte range `[offset, offset+len)`.
    /// The returned guard exposes the range as one or two sub-slices and
    /// releases the region when dropped, on every exit path.
    fn lock(&self, offset: usize, len: usize) -> Result<LockedRegion<'_>, DeviceError>;

    /// Registers one notification per block boundary. `offsets[i]` is the byte
    /// offset whose crossing signals event `i`. Must be called once, before
    /// playback starts.
    fn set_notification_positions(&self, offsets: &[usize]) -> Result<(), DeviceError>;

    /// Starts looped playback of the whole buffer.
    fn play_looping(&self) -> Result<(), DeviceError>;

    /// Blocks until a registered block boundary is crossed, the buffer is
    /// abandoned, or the timeout elapses. `None` waits forever.
    fn wait_notification(&self, timeout: Option<Duration>) -> WaitOutcome;
}

/// Exclusive write access to a byte range of a playback buffer.
///
/// The range is exposed as up to two disjoint sub-slices: the backend may
/// segment the request, and a range wrapping the end of the circular buffer
/// necessarily comes back in two pieces. Dropping the guard releases the
/// region unconditionally.
pub struct LockedRegion<'a> {
    guard: MutexGuard<'a, Box<[i16]>>,
    /// Region start, in i16 slots.
    start: usize,
    /// Region length, in i16 slots.
    len: usize,
    /// Backend-imposed split point relative to the region start, in slots.
    split: Option<usize>,
}

impl<'a> LockedRegion<'a> {
    /// Wraps storage access into a region guard. Offsets are in bytes and
    /// must be 16-bit aligned and within twice the capacity (a wrapping range
    /// may extend past the end once).
    pub(crate) fn new(
        guard: MutexGuard<'a, Box<[i16]>>,
        offset: usize,
        len: usize,
        split: Option<usize>,
    ) -> Result<LockedRegion<'a>, DeviceError> {
        let capacity_bytes = guard.len() * 2;
        if offset % 2 != 0 || len % 2 != 0 {
            return Err(DeviceError::Lock {
                offset,
                len,
                reason: "range is not 16-bit aligned".to_string(),
            });
        }
        if offset >= capacity_bytes || len > capacity_bytes {
            return Err(DeviceError::Lock {
                offset,
                len,
                reason: format!("range exceeds buffer capacity {}", capacity_bytes),
            });
        }

        Ok(LockedRegion {
            guard,
            start: offset / 2,
            len: len / 2,
            split: split.map(|bytes| bytes / 2),
        })
    }

    /// The locked range as two disjoint mutable sub-slices of 16-bit slots.
    /// The second slice is empty unless the backend segmented the range or
    /// the range wraps the end of the buffer.
    pub fn parts_mut(&mut self) -> (&mut [i16], &mut [i16]) {
        let capacity = self.guard.len();

        if self.start + self.len <= capacity {
            let region = &mut self.guard[self.start..self.start + self.len];
            let split = match self.split {
                Some(split) if split < region.len() => split,
                _ => region.len(),
            };
            region.split_at_mut(split)
        } else {
            // The range wraps: tail of the buffer, then the remainder from
            // the front.
            let wrapped = self.start + self.len - capacity;
            let (head, tail) = self.guard.split_at_mut(self.start);
            (tail, &mut head[..wrapped])
        }
    }

    /// The locked range length in i16 slots.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device by name; `None` selects the default output device. Names
/// starting with "mock" resolve to the mock backend.
pub fn get_device(name: Option<&str>) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if let Some(name) = name {
        if name.starts_with("mock") {
            return Ok(Arc::new(mock::Device::get(name)));
        }
    }

    Ok(Arc::new(cpal::Device::get(name)?))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn storage(slots: usize) -> Mutex<Box<[i16]>> {
        Mutex::new(vec![0i16; slots].into_boxed_slice())
    }

    #[test]
    fn test_contiguous_region_is_one_part() {
        let storage = storage(16);
        let guard = storage.lock().expect("Error getting lock");
        let mut region = LockedRegion::new(guard, 8, 16, None).expect("lock failed");

        let (first, second) = region.parts_mut();
        assert_eq!(first.len(), 8);
        assert!(second.is_empty());
    }

    #[test]
    fn test_wrapping_region_is_two_parts() {
        let storage = storage(16);
        let guard = storage.lock().expect("Error getting lock");
        // 8 slots starting 4 slots before the end: 4 at the tail, 4 wrapped.
        let mut region = LockedRegion::new(guard, 24, 16, None).expect("lock failed");

        let (first, second) = region.parts_mut();
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
    }

    #[test]
    fn test_segmented_region_parts_tile_the_range() {
        let storage = storage(16);
        let guard = storage.lock().expect("Error getting lock");
        let mut region = LockedRegion::new(guard, 0, 20, Some(8)).expect("lock failed");

        let (first_len, second_len) = {
            let (first, second) = region.parts_mut();
            (first.len(), second.len())
        };
        assert_eq!(first_len, 4);
        assert_eq!(second_len, 6);
        assert_eq!(first_len + second_len, region.len());
    }

    #[test]
    fn test_misaligned_range_rejected() {
        let storage = storage(16);
        let guard = storage.lock().expect("Error getting lock");
        assert!(LockedRegion::new(guard, 1, 4, None).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let storage = storage(16);
        let guard = storage.lock().expect("Error getting lock");
        assert!(LockedRegion::new(guard, 32, 4, None).is_err());
    }

    #[test]
    fn test_get_device_dispatches_on_mock_prefix() {
        let device = get_device(Some("mock-dispatch")).expect("get_device failed");
        assert!(device.to_mock().is_ok());
        assert_eq!(device.to_string(), "mock-dispatch (Mock)");
    }

    #[test]
    fn test_writes_through_parts_land_in_storage() {
        let storage = storage(8);
        {
            let guard = storage.lock().expect("Error getting lock");
            let mut region = LockedRegion::new(guard, 4, 8, None).expect("lock failed");
            let (first, _) = region.parts_mut();
            first.copy_from_slice(&[1, 2, 3, 4]);
        }

        let stored = storage.lock().expect("Error getting lock");
        assert_eq!(&stored[2..6], &[1, 2, 3, 4]);
    }
}
