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

//! Infinite sample generators.
//!
//! Every generator runs on its own thread and hands samples to its consumer
//! through a capacity-zero rendezvous channel: each send blocks until the
//! consumer asks for the value, so a generator can never run ahead of the
//! rate the device consumes samples. Generators are not restartable from the
//! outside; looping (the waveform file, the endless note draw) happens
//! internally.

use std::process;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::error;

pub mod note;
pub mod voice;
pub mod wav;

/// Errors encountered while setting up a sample source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Waveform file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Waveform file has no PCM payload: {}", .0.display())]
    EmptyPayload(std::path::PathBuf),
}

/// An infinite stream of normalized samples produced by a generator thread.
pub struct SampleStream {
    rx: Receiver<f32>,
}

impl SampleStream {
    /// Spawns a generator thread producing into a rendezvous channel. The
    /// generator should return when a send fails, which means the stream was
    /// dropped.
    pub(crate) fn spawn<F>(generate: F) -> SampleStream
    where
        F: FnOnce(Sender<f32>) + Send + 'static,
    {
        let (tx, rx) = bounded(0);
        thread::spawn(move || generate(tx));
        SampleStream { rx }
    }

    /// The next sample. A generator never terminates on its own, so a closed
    /// channel here means the generator died mid-stream; there is no fallback
    /// audio source, so that is fatal.
    pub fn next(&self) -> f32 {
        match self.rx.recv() {
            Ok(sample) => sample,
            Err(_) => {
                error!("Sample generator terminated unexpectedly.");
                process::exit(1);
            }
        }
    }
}
