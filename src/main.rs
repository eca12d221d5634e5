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
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use linksynth::{
    audio, config, link, protocol::ProtocolMode, receiver, shutdown::StopHandle, stats::Stats,
};
use tracing::{error, info};

/// How often receive statistics are logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Plays a serial link carrying MIDI or raw PCM audio."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Receives from a link and plays it until interrupted.
    Receive {
        /// The link to read from: a serial device node configured beforehand (e.g. with
        /// stty), "-" for standard input, or "mock" for an idle test link.
        link: String,
        /// Treat the link as MIDI without probing it.
        #[arg(long, conflicts_with = "audio")]
        midi: bool,
        /// Treat the link as raw PCM audio without probing it.
        #[arg(long)]
        audio: bool,
        /// The path to a receiver config file.
        #[arg[short, long]]
        config: Option<PathBuf>,
        /// The audio output device. Overrides the config file.
        #[arg[short, long]]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(err = %e, "linksynth failed.");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
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
        Commands::Receive {
            link,
            midi,
            audio,
            config: config_path,
            device: device_name,
        } => {
            let mut config = config::load(config_path.as_deref())?;
            if let Some(device_name) = device_name {
                config = config.with_audio_device(&device_name);
            }
            let forced = receiver::forced_mode(midi, audio, &config)?;

            receive(config, forced, &link).await?;
        }
    }

    Ok(())
}

/// Runs a receive session on a blocking thread until it fails or Ctrl-C stops it.
async fn receive(
    config: config::Receiver,
    forced: Option<ProtocolMode>,
    link_path: &str,
) -> Result<(), Box<dyn Error>> {
    let device = audio::get_device(config.audio_device())?;
    let source = link::open(link_path)?;
    let stats = Arc::new(Stats::default());
    let stop = StopHandle::new();

    let mut session = {
        let stats = stats.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || {
            receiver::run(&config, forced, source, device, stats, stop)
        })
    };
    let reporter = tokio::spawn(report_status(stats.clone()));

    let result = tokio::select! {
        result = &mut session => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping receiver.");
            stop.stop();
            session.await
        }
    };
    reporter.abort();

    let mode = result??;
    info!(mode = %mode, stats = %stats.snapshot(), "Receiver stopped.");
    Ok(())
}

/// Periodically logs what the receiver has seen.
async fn report_status(stats: Arc<Stats>) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        info!(stats = %stats.snapshot(), "Receiving.");
    }
}
