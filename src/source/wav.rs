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
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::process;

use tracing::error;

use super::{SampleStream, SourceError};

/// Byte offset of the PCM payload length field.
const PAYLOAD_LEN_OFFSET: u64 = 40;
/// Byte offset of the first PCM frame.
const PAYLOAD_OFFSET: u64 = 44;
/// Bytes per interleaved 16-bit stereo frame.
const FRAME_SIZE: u32 = 4;

/// Streams the PCM payload of a waveform file forever, seeking back to the
/// start of the payload each time it runs out. Samples are interleaved
/// left/right, scaled to [-1.0, 1.0).
///
/// Only two container fields are read: the payload length at byte 40 and the
/// payload itself from byte 44. Everything else is ignored. Failure to open
/// or size the file aborts here; a read failure mid-stream terminates the
/// process, since there is no fallback audio source.
pub fn stream<P: AsRef<Path>>(path: P) -> Result<SampleStream, SourceError> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);

    reader.seek(SeekFrom::Start(PAYLOAD_LEN_OFFSET))?;
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let payload_len = u32::from_le_bytes(len_bytes);

    let frames = payload_len / FRAME_SIZE;
    if frames == 0 {
        return Err(SourceError::EmptyPayload(path));
    }

    Ok(SampleStream::spawn(move |tx| {
        let mut frame = [0u8; FRAME_SIZE as usize];
        loop {
            if let Err(err) = reader.seek(SeekFrom::Start(PAYLOAD_OFFSET)) {
                fatal(&path, err);
            }

            for _ in 0..frames {
                if let Err(err) = reader.read_exact(&mut frame) {
                    fatal(&path, err);
                }

                let left = i16::from_le_bytes([frame[0], frame[1]]) as f32 / 32768.0;
                let right = i16::from_le_bytes([frame[2], frame[3]]) as f32 / 32768.0;
                if tx.send(left).is_err() || tx.send(right).is_err() {
                    return;
                }
            }
        }
    }))
}

fn fatal(path: &Path, err: std::io::Error) -> ! {
    error!(
        path = path.display().to_string(),
        err = err.to_string(),
        "Error reading waveform file."
    );
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Writes a 16-bit stereo WAV file with the given interleaved samples and
    /// returns its path. hound writes the canonical 44-byte header, putting
    /// the payload length at byte 40 and the payload at byte 44.
    fn write_fixture(dir: &tempfile::TempDir, samples: &[i16]) -> PathBuf {
        let path = dir.path().join("fixture.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec).expect("fixture creation failed");
        for sample in samples {
            writer.write_sample(*sample).expect("fixture write failed");
        }
        writer.finalize().expect("fixture finalize failed");
        path
    }

    #[test]
    fn test_samples_decode_scaled() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = write_fixture(&dir, &[16384, -16384, 32767, -32768]);

        let stream = stream(&path).expect("stream failed");
        assert_eq!(stream.next(), 0.5);
        assert_eq!(stream.next(), -0.5);
        assert_eq!(stream.next(), 32767.0 / 32768.0);
        assert_eq!(stream.next(), -1.0);
    }

    #[test]
    fn test_stream_loops_identically() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let samples: Vec<i16> = (0..12).map(|v| v * 1000 - 6000).collect();
        let path = write_fixture(&dir, &samples);

        let stream = stream(&path).expect("stream failed");
        let first_pass: Vec<f32> = (0..samples.len()).map(|_| stream.next()).collect();

        // Every subsequent pass repeats the identical sequence: the sample at
        // logical position k equals the one at k modulo the payload length.
        for pass in 0..3 {
            for (k, expected) in first_pass.iter().enumerate() {
                let sample = stream.next();
                assert_eq!(
                    sample, *expected,
                    "pass {} diverged at sample {}",
                    pass, k
                );
            }
        }
    }

    #[test]
    fn test_missing_file_is_a_setup_error() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let result = stream(dir.path().join("missing.wav"));
        assert!(matches!(result, Err(SourceError::Io(_))));
    }

    #[test]
    fn test_empty_payload_is_a_setup_error() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = write_fixture(&dir, &[]);
        let result = stream(&path);
        assert!(matches!(result, Err(SourceError::EmptyPayload(_))));
    }
}
