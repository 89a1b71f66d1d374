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
use std::process;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, span, Level};

use crate::audio::{format, Device, DeviceError, PlaybackBuffer};
use crate::mixer::{self, Mixer};
use crate::playsync::WaitOutcome;

/// The refill loop's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    /// Blocked on the buffer's notifications.
    Waiting,
    /// A boundary fired; the block behind it is being rewritten.
    Refilling(usize),
    /// The wait was abandoned or expired. Terminal; the loop does not restart.
    Terminated,
}

/// Renders the mix into a device's circular playback buffer, refilling one
/// block at a time as the playback cursor moves.
pub struct Player {
    buffer: Arc<dyn PlaybackBuffer>,
    mixer: Mixer,
}

impl Player {
    /// Creates a player with a freshly created playback buffer on the device.
    pub fn new(device: &dyn Device, mixer: Mixer) -> Result<Player, DeviceError> {
        let buffer = device.create_buffer(format::BUFFER_SIZE)?;
        Ok(Player { buffer, mixer })
    }

    /// Primes the buffer, registers the block-boundary notifications, starts
    /// looped playback, and hands the refill loop its own thread. The caller
    /// does not need to join the handle; playback stops when the process
    /// exits.
    pub fn start(mut self) -> Result<thread::JoinHandle<()>, DeviceError> {
        info!(
            blocks = format::NUM_BLOCKS,
            block_size = format::BLOCK_SIZE,
            "Priming playback buffer."
        );
        self.prime();

        let offsets: Vec<usize> = (0..format::NUM_BLOCKS)
            .map(|block| block * format::BLOCK_SIZE)
            .collect();
        self.buffer.set_notification_positions(&offsets)?;
        self.buffer.play_looping()?;

        Ok(thread::spawn(move || self.dispatch()))
    }

    /// Fills every block except the last. The unfilled block is the first
    /// one the refill loop rewrites: playback starts in block 0, whose
    /// boundary notification targets the block behind it.
    fn prime(&mut self) {
        for block in 0..format::NUM_BLOCKS - 1 {
            self.fill_block(block);
        }
    }

    /// Runs the refill loop until it terminates.
    fn dispatch(&mut self) {
        let span = span!(Level::INFO, "refill dispatcher");
        let _enter = span.enter();

        let mut state = DispatchState::Waiting;
        while state != DispatchState::Terminated {
            state = self.step(state);
        }
        debug!("Refill loop terminated.");
    }

    /// Advances the refill loop by one transition.
    fn step(&mut self, state: DispatchState) -> DispatchState {
        match state {
            DispatchState::Waiting => Self::transition(self.buffer.wait_notification(None)),
            DispatchState::Refilling(block) => {
                self.fill_block(block);
                DispatchState::Waiting
            }
            DispatchState::Terminated => DispatchState::Terminated,
        }
    }

    /// Maps a wait outcome onto the next state. Abandonment and expiry are
    /// both terminal; only a signaled boundary leads to a refill.
    fn transition(outcome: WaitOutcome) -> DispatchState {
        match outcome {
            WaitOutcome::Signaled(index) => DispatchState::Refilling(refill_target(index)),
            WaitOutcome::Abandoned | WaitOutcome::TimedOut => DispatchState::Terminated,
        }
    }

    /// Fills one block with mixed, quantized frames. The write region is
    /// released when the guard drops, whatever path leaves this function.
    fn fill_block(&mut self, block: usize) {
        let mut region = match self
            .buffer
            .lock(block * format::BLOCK_SIZE, format::BLOCK_SIZE)
        {
            Ok(region) => region,
            Err(err) => {
                // Not retried: a skipped refill replays a stale block.
                error!(
                    err = err.to_string(),
                    block, "Failed to lock playback buffer block."
                );
                process::exit(1);
            }
        };

        let (first, second) = region.parts_mut();
        write_frames(first, &mut self.mixer);
        write_frames(second, &mut self.mixer);
    }
}

/// Writes mixed frames into a run of interleaved 16-bit slots.
fn write_frames(slots: &mut [i16], mixer: &mut Mixer) {
    for frame in slots.chunks_exact_mut(2) {
        let (left, right) = mixer.next_frame();
        frame[0] = mixer::quantize(left);
        frame[1] = mixer::quantize(right);
    }
}

/// The block that is safe to rewrite once playback has entered `current`:
/// the one immediately behind it, which the cursor has fully consumed. Never
/// the current block or the one ahead.
fn refill_target(current: usize) -> usize {
    (current + format::NUM_BLOCKS - 1) % format::NUM_BLOCKS
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audio::mock;
    use crate::source::SampleStream;

    fn constant(value: f32) -> SampleStream {
        SampleStream::spawn(move |tx| while tx.send(value).is_ok() {})
    }

    fn mock_player(base: f32, voice: f32) -> (Player, Arc<mock::Buffer>) {
        let device = mock::Device::get("mock-player");
        let mixer = Mixer::new(constant(base), constant(voice), constant(voice));
        let player = Player::new(&device, mixer).expect("player creation failed");
        let buffer = device.buffer().expect("no buffer created");
        (player, buffer)
    }

    fn register_all_blocks(buffer: &mock::Buffer) {
        let offsets: Vec<usize> = (0..format::NUM_BLOCKS)
            .map(|block| block * format::BLOCK_SIZE)
            .collect();
        buffer
            .set_notification_positions(&offsets)
            .expect("registration failed");
    }

    #[test]
    fn test_refill_target_is_always_the_block_behind() {
        for current in 0..format::NUM_BLOCKS {
            let target = refill_target(current);
            assert!(target < format::NUM_BLOCKS);
            assert_ne!(target, current);
            // One behind, modulo the block count.
            assert_eq!((target + 1) % format::NUM_BLOCKS, current);
        }
    }

    #[test]
    fn test_priming_leaves_exactly_the_last_block_unfilled() {
        let (mut player, buffer) = mock_player(1.0, 1.0);
        player.prime();

        let locks = buffer.locks();
        assert_eq!(locks.len(), format::NUM_BLOCKS - 1);
        for (block, (offset, len)) in locks.iter().enumerate() {
            assert_eq!(*offset, block * format::BLOCK_SIZE);
            assert_eq!(*len, format::BLOCK_SIZE);
        }

        // Blocks 0..N-1 hold the saturated mix; the last block is untouched.
        let contents = buffer.contents();
        let slots_per_block = format::BLOCK_SIZE / 2;
        assert_eq!(contents[0], 32767);
        assert_eq!(contents[(format::NUM_BLOCKS - 1) * slots_per_block - 1], 32767);
        assert!(contents[(format::NUM_BLOCKS - 1) * slots_per_block..]
            .iter()
            .all(|slot| *slot == 0));
    }

    #[test]
    fn test_fill_block_writes_quantized_mix() {
        let (mut player, buffer) = mock_player(0.5, 0.5);
        player.fill_block(2);

        let slots_per_block = format::BLOCK_SIZE / 2;
        let contents = buffer.contents();
        // (0.5 + 0.5) * 0.5 = 0.5 -> 16383 after truncation.
        for slot in &contents[2 * slots_per_block..3 * slots_per_block] {
            assert_eq!(*slot, 16383);
        }
        assert!(contents[..2 * slots_per_block].iter().all(|slot| *slot == 0));
    }

    #[test]
    fn test_fill_block_handles_segmented_regions() {
        let (mut player, buffer) = mock_player(0.5, 0.5);
        // Split the region at an uneven spot; both parts must still be
        // written in full.
        buffer.force_split(Some(5000));
        player.fill_block(0);

        let slots_per_block = format::BLOCK_SIZE / 2;
        let contents = buffer.contents();
        for slot in &contents[..slots_per_block] {
            assert_eq!(*slot, 16383);
        }
    }

    #[test]
    fn test_block_one_signals_always_refill_block_zero() {
        let (mut player, buffer) = mock_player(0.5, 0.5);
        register_all_blocks(&buffer);

        for _ in 0..9 {
            buffer.signal(1);

            let state = player.step(DispatchState::Waiting);
            assert_eq!(state, DispatchState::Refilling(0));
            assert_eq!(player.step(state), DispatchState::Waiting);
        }

        let locks = buffer.locks();
        assert_eq!(locks.len(), 9);
        for (offset, len) in locks {
            assert_eq!(offset, 0);
            assert_eq!(len, format::BLOCK_SIZE);
        }
    }

    #[test]
    fn test_abandonment_terminates_without_refilling() {
        let (mut player, buffer) = mock_player(0.5, 0.5);
        register_all_blocks(&buffer);

        // Abandonment wins even with a signal already pending.
        buffer.signal(1);
        buffer.abandon();

        let state = player.step(DispatchState::Waiting);
        assert_eq!(state, DispatchState::Terminated);

        // Terminal: further signals change nothing and nothing was filled.
        buffer.signal(2);
        assert_eq!(player.step(state), DispatchState::Terminated);
        assert!(buffer.locks().is_empty());
    }

    #[test]
    fn test_every_wait_outcome_maps_to_the_right_state() {
        assert_eq!(
            Player::transition(WaitOutcome::Signaled(1)),
            DispatchState::Refilling(0)
        );
        assert_eq!(
            Player::transition(WaitOutcome::Signaled(0)),
            DispatchState::Refilling(format::NUM_BLOCKS - 1)
        );
        assert_eq!(
            Player::transition(WaitOutcome::Abandoned),
            DispatchState::Terminated
        );
        assert_eq!(
            Player::transition(WaitOutcome::TimedOut),
            DispatchState::Terminated
        );
    }

    #[test]
    fn test_started_player_runs_the_refill_loop() {
        let (player, buffer) = mock_player(0.5, 0.5);

        let dispatcher = player.start().expect("start failed");
        assert!(buffer.is_playing());

        // The mock cursor starts in block 0, so its boundary fires at once
        // and the loop fills the one block priming left empty.
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while buffer.locks().len() < format::NUM_BLOCKS && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let locks = buffer.locks();
        assert!(locks.len() >= format::NUM_BLOCKS);
        assert_eq!(
            locks[format::NUM_BLOCKS - 1],
            ((format::NUM_BLOCKS - 1) * format::BLOCK_SIZE, format::BLOCK_SIZE)
        );

        buffer.abandon();
        dispatcher.join().expect("dispatcher panicked");
    }
}
