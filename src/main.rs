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
mod audio;
mod mixer;
mod player;
mod playsync;
mod source;

use std::error::Error;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;

use crate::audio::format;
use crate::mixer::Mixer;
use crate::player::Player;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A streaming arpeggio demo player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Loops the given waveform file underneath two generated arpeggios
    /// until interrupted.
    Play {
        /// The path to the waveform file to loop.
        wav_path: PathBuf,
        /// The output device to play through. Defaults to the system default
        /// output; names starting with "mock" select the mock backend.
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play { wav_path, device } => {
            let device = audio::get_device(device.as_deref())?;

            // The bed track plus one arpeggio per channel: a slower one on
            // the left, a faster one an octave figure apart on the right.
            let bed = source::wav::stream(&wav_path)?;
            let left = source::voice::arpeggio(
                format::SAMPLE_RATE as f64,
                1.0 / 4.0,
                source::note::random_notes(2, vec![3.0, 5.0, 7.0, 10.0]),
            );
            let right = source::voice::arpeggio(
                format::SAMPLE_RATE as f64,
                1.0 / 8.0,
                source::note::random_notes(2, vec![0.0, 7.0, 12.0]),
            );

            let player = Player::new(device.as_ref(), Mixer::new(bed, left, right))?;
            let _dispatcher = player.start()?;

            info!(
                path = wav_path.display().to_string(),
                device = device.to_string(),
                "Playing. Press Ctrl-C to stop."
            );
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
