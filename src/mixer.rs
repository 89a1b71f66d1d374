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
use crate::source::SampleStream;

/// Mixes the stereo base stream with one foreground voice per channel.
///
/// Each output frame draws two samples from the base stream (its own left and
/// right) and one from each voice, combining them with equal 0.5 weighting.
/// There is no limiter: a hot mix clips at quantization, which is accepted
/// behavior for this player.
pub struct Mixer {
    base: SampleStream,
    left: SampleStream,
    right: SampleStream,
}

impl Mixer {
    /// Creates a mixer over the base stream and the two foreground voices.
    pub fn new(base: SampleStream, left: SampleStream, right: SampleStream) -> Mixer {
        Mixer { base, left, right }
    }

    /// The next mixed stereo frame, normalized but not yet quantized.
    pub fn next_frame(&mut self) -> (f32, f32) {
        let left = (self.base.next() + self.left.next()) * 0.5;
        let right = (self.base.next() + self.right.next()) * 0.5;
        (left, right)
    }
}

/// Quantizes a normalized sample to signed 16-bit PCM. The float-to-int cast
/// truncates and saturates, so out-of-range mixes clip instead of wrapping.
pub fn quantize(sample: f32) -> i16 {
    (sample * 32767.0) as i16
}
