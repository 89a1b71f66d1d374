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
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use rand::Rng;

/// A pitch offset in semitones from the reference pitch (A440).
pub type Note = f64;

/// An infinite stream of notes produced by a generator thread.
pub struct NoteStream {
    rx: Receiver<Note>,
}

impl NoteStream {
    /// The next note, or `None` once the generator is gone.
    pub(crate) fn next(&self) -> Option<Note> {
        self.rx.recv().ok()
    }
}

/// Produces an endless stream of notes drawn uniformly from the given scale,
/// each shifted up by a random whole number of octaves in `[0, octaves)`.
pub fn random_notes(octaves: u32, scale: Vec<Note>) -> NoteStream {
    assert!(!scale.is_empty(), "scale must not be empty");
    assert!(octaves > 0, "octave range must be at least 1");

    let (tx, rx) = bounded(0);
    thread::spawn(move || {
        let mut rng = rand::thread_rng();
        loop {
            let note = scale[rng.gen_range(0..scale.len())] + 12.0 * rng.gen_range(0..octaves) as f64;
            if tx.send(note).is_err() {
                return;
            }
        }
    });

    NoteStream { rx }
}

#[cfg(test)]
impl NoteStream {
    /// A stream that yields the same note forever.
    pub(crate) fn constant(note: Note) -> NoteStream {
        let (tx, rx) = bounded(0);
        thread::spawn(move || while tx.send(note).is_ok() {});
        NoteStream { rx }
    }
}
