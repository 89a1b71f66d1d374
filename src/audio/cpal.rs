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
use std::error::Error as StdError;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::audio::{format, DeviceError, LockedRegion, PlaybackBuffer};
use crate::playsync::{Notifications, WaitOutcome};

/// A small wrapper around a cpal::Device that hosts the circular playback
/// buffer and drives its notifications from the output stream callback.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl Device {
    /// Gets a device by name; `None` selects the host's default output.
    pub fn get(name: Option<&str>) -> Result<Device, DeviceError> {
        let host = cpal::default_host();

        let device = match name {
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::NoDevice("no default output device".to_string()))?,
            Some(name) => host
                .output_devices()
                .map_err(|e| DeviceError::NoDevice(e.to_string()))?
                .find(|device| {
                    device
                        .name()
                        .map(|device_name| device_name == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| DeviceError::NoDevice(format!("no output device named {}", name)))?,
        };

        let name = device
            .name()
            .map_err(|e| DeviceError::NoDevice(e.to_string()))?;

        Ok(Device {
            name,
            host_id: host.id(),
            device,
        })
    }

    /// Lists the output devices of the default host.
    pub fn list() -> Result<Vec<Box<dyn crate::audio::Device>>, Box<dyn std::error::Error>> {
        let host = cpal::default_host();
        let mut devices: Vec<Box<dyn crate::audio::Device>> = Vec::new();

        for device in host.output_devices()? {
            let name = device.name()?;
            devices.push(Box::new(Device {
                name,
                host_id: host.id(),
                device,
            }));
        }

        Ok(devices)
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

        Ok(Arc::new(Buffer {
            shared: Arc::new(Shared {
                samples: Mutex::new(vec![0i16; capacity / 2].into_boxed_slice()),
                cursor: AtomicUsize::new(0),
                registration: Mutex::new(None),
            }),
            capacity,
            device: self.device.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            output_thread: Mutex::new(None),
        }))
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<crate::audio::mock::Device>, Box<dyn StdError>> {
        Err("not a mock device".into())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.host_id.name())
    }
}

struct Registration {
    /// Byte offsets of the registered boundaries, by event index.
    offsets: Vec<usize>,
    events: Arc<Notifications>,
}

/// State shared with the output stream callback.
struct Shared {
    samples: Mutex<Box<[i16]>>,
    /// Playback cursor, in i16 slots.
    cursor: AtomicUsize,
    registration: Mutex<Option<Registration>>,
}

/// A circular playback buffer rendered through a cpal output stream.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated output
/// thread for the lifetime of the buffer; the callback consumes the stored
/// samples at the device rate and fires each registered boundary event as the
/// cursor reaches it.
pub struct Buffer {
    shared: Arc<Shared>,
    capacity: usize,
    device: cpal::Device,
    stop: Arc<AtomicBool>,
    output_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PlaybackBuffer for Buffer {
    fn lock(&self, offset: usize, len: usize) -> Result<LockedRegion<'_>, DeviceError> {
        let guard = self.shared.samples.lock().map_err(|_| DeviceError::Lock {
            offset,
            len,
            reason: "buffer storage poisoned".to_string(),
        })?;
        LockedRegion::new(guard, offset, len, None)
    }

    fn set_notification_positions(&self, offsets: &[usize]) -> Result<(), DeviceError> {
        if offsets.is_empty() {
            return Err(DeviceError::Notification(
                "no notification positions given".to_string(),
            ));
        }
        for offset in offsets {
            if *offset >= self.capacity || *offset % 2 != 0 {
                return Err(DeviceError::Notification(format!(
                    "invalid notification offset {}",
                    offset
                )));
            }
        }

        let mut registration = self.shared.registration.lock().expect("Error getting lock");
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
        let mut output_thread = self.output_thread.lock().expect("Error getting lock");
        if output_thread.is_some() {
            return Err(DeviceError::Stream("already playing".to_string()));
        }

        let sample_format = self
            .device
            .default_output_config()
            .map_err(|e| DeviceError::Configuration(e.to_string()))?
            .sample_format();

        // The stream must be created on the thread that owns it. Report the
        // outcome of stream creation back through a rendezvous so setup
        // failures surface before playback is considered started.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), DeviceError>>();
        let shared = self.shared.clone();
        let device = self.device.clone();
        let stop = self.stop.clone();

        let join_handle = thread::spawn(move || {
            let config = cpal::StreamConfig {
                channels: format::CHANNELS,
                sample_rate: format::SAMPLE_RATE,
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = match sample_format {
                cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared.clone()),
                cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared.clone()),
                other => Err(DeviceError::Configuration(format!(
                    "unsupported output sample format {:?}",
                    other
                ))),
            };

            let stream = match stream.and_then(|stream| {
                stream
                    .play()
                    .map_err(|e| DeviceError::Stream(e.to_string()))?;
                Ok(stream)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            // Keep the stream alive until the buffer goes away.
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);

            let registration = shared.registration.lock().expect("Error getting lock");
            if let Some(registration) = registration.as_ref() {
                registration.events.abandon();
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(capacity = self.capacity, "Playback started.");
                *output_thread = Some(join_handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = join_handle.join();
                Err(DeviceError::Stream(
                    "output thread died during stream setup".to_string(),
                ))
            }
        }
    }

    fn wait_notification(&self, timeout: Option<Duration>) -> WaitOutcome {
        let events = {
            let registration = self.shared.registration.lock().expect("Error getting lock");
            match registration.as_ref() {
                Some(registration) => registration.events.clone(),
                None => return WaitOutcome::Abandoned,
            }
        };
        events.wait(timeout)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Stop playback first; the output thread abandons the notification
        // interface on its way out.
        self.stop.store(true, Ordering::Relaxed);
        let output_thread = self.output_thread.lock().expect("Error getting lock").take();
        if let Some(output_thread) = output_thread {
            let _ = output_thread.join();
        }
    }
}

/// Builds the output stream. The callback consumes stored i16 samples at the
/// device rate, converting to the stream's sample type, and fires each
/// registered boundary event the cursor reaches.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let callback_shared = shared.clone();
    let data_callback = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let mut fired: Vec<usize> = Vec::new();

        {
            let samples = match callback_shared.samples.lock() {
                Ok(samples) => samples,
                Err(_) => {
                    data.fill(T::from_sample(0i16));
                    return;
                }
            };

            let total = samples.len();
            let start = callback_shared.cursor.load(Ordering::Acquire);
            let mut cursor = start;
            for out in data.iter_mut() {
                *out = T::from_sample(samples[cursor]);
                cursor = (cursor + 1) % total;
            }
            callback_shared.cursor.store(cursor, Ordering::Release);

            let advanced = data.len();
            let registration = callback_shared
                .registration
                .lock()
                .expect("Error getting lock");
            if let Some(registration) = registration.as_ref() {
                for (index, offset) in registration.offsets.iter().enumerate() {
                    // The boundary fires when the cursor lands on or passes
                    // it during this callback.
                    let slot = offset / 2;
                    let distance = (slot + total - start) % total;
                    if distance < advanced {
                        fired.push(index);
                    }
                }
            }
        }

        if !fired.is_empty() {
            let registration = callback_shared
                .registration
                .lock()
                .expect("Error getting lock");
            if let Some(registration) = registration.as_ref() {
                for index in fired {
                    registration.events.signal(index);
                }
            }
        }
    };

    let error_shared = shared;
    let error_callback = move |e: cpal::StreamError| {
        error!(err = e.to_string(), "Playback stream error.");
        let registration = error_shared.registration.lock().expect("Error getting lock");
        if let Some(registration) = registration.as_ref() {
            registration.events.abandon();
        }
    };

    device
        .build_output_stream(config, data_callback, error_callback, None)
        .map_err(|e| DeviceError::Stream(e.to_string()))
}
