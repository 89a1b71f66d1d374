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
use std::f64::consts::PI;

use super::note::NoteStream;
use super::SampleStream;

/// The pitch the note offsets are relative to.
const REFERENCE_FREQ: f64 = 440.0;

/// An arpeggiator voice: for each note drawn from the stream it emits
/// `sample_rate * note_len` samples of a sine tone fading linearly from full
/// amplitude to zero, then moves on to the next note.
pub fn arpeggio(sample_rate: f64, note_len: f64, notes: NoteStream) -> SampleStream {
    SampleStream::spawn(move |tx| {
        while let Some(note) = notes.next() {
            let step = 2.0 * PI * REFERENCE_FREQ * (note / 12.0).exp2() / sample_rate;
            let total = step * sample_rate * note_len;

            let mut phase = 0.0;
            while phase < total {
                let sample = phase.sin() * (total - phase) / total;
                if tx.send(sample as f32).is_err() {
                    return;
                }
                phase += step;
            }
        }
    })
}
