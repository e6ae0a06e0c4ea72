//! mt32play - play MIDI through an emulated Roland MT-32.
//!
//! # Usage
//!
//! ```bash
//! mt32play --romdir ~/roms render song.mid -o song.wav   # offline render
//! mt32play --config mt32.toml play song.mid              # live playback
//! mt32play jack --ports 2                                # JACK MIDI input
//! ```
//!
//! Set `RUST_LOG=debug` (and `mt32.verbose = "on"`) for engine traces.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mt32drv::config::{Config, Mt32Options};
use mt32drv::midi::load_score;
use mt32drv::mixer::{StreamMixer, WavMixer};
use mt32drv::player::play_score;
use mt32drv::synth::munt::MuntEngine;
use mt32drv::synth::Mt32Handler;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "mt32play", version, about = "Play MIDI through an emulated Roland MT-32")]
struct Cli {
    /// TOML configuration file with [midi] and [jack] tables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing the control and PCM ROMs (overrides mt32.romdir)
    #[arg(short, long, global = true)]
    romdir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a MIDI file to a WAV file
    Render {
        midi: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Play a MIDI file on the default output device
    Play {
        midi: PathBuf,
        /// Output ring size in milliseconds
        #[arg(long, default_value_t = 100)]
        buffer_ms: u32,
    },
    /// Expose JACK MIDI inputs and play what arrives until stdin closes
    #[cfg(feature = "jack-backend")]
    Jack {
        /// Number of MIDI endpoints (overrides jack.ports)
        #[arg(long)]
        ports: Option<usize>,
    },
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    let mut section = config.midi.mt32.clone();
    if let Some(romdir) = cli.romdir {
        section.romdir = romdir;
    }
    let options = Mt32Options::from_section(&section).context("Invalid [midi] configuration")?;

    match cli.command {
        Command::Render { midi, output } => render(&options, &midi, &output),
        Command::Play { midi, buffer_ms } => play(&options, &midi, buffer_ms),
        #[cfg(feature = "jack-backend")]
        Command::Jack { ports } => jack::run(&options, &config.jack, ports),
    }
}

/// Renders a MIDI file offline into a WAV file.
fn render(options: &Mt32Options, midi: &Path, output: &Path) -> Result<()> {
    let mut handler = Mt32Handler::new(MuntEngine::new, WavMixer::new(output));
    handler.open(options).context("Failed to open MT-32 backend")?;

    let score = load_score(midi, handler.sample_rate())
        .with_context(|| format!("Failed to load {}", midi.display()))?;
    let frames = play_score(&mut handler, &score, |_, _| {}).context("Rendering failed")?;
    let seconds = frames as f64 / f64::from(score.sample_rate);
    handler.close();

    tracing::info!("Wrote {} ({:.1} s)", output.display(), seconds);
    Ok(())
}

/// Plays a MIDI file live, rendering only as fast as the output drains.
fn play(options: &Mt32Options, midi: &Path, buffer_ms: u32) -> Result<()> {
    let mixer = StreamMixer::new()
        .context("Failed to open audio output")?
        .with_buffer_ms(buffer_ms);
    let mut handler = Mt32Handler::new(MuntEngine::new, mixer);
    handler.open(options).context("Failed to open MT-32 backend")?;

    let score = load_score(midi, handler.sample_rate())
        .with_context(|| format!("Failed to load {}", midi.display()))?;
    play_score(&mut handler, &score, |handler, frames| {
        while handler
            .channel()
            .is_some_and(|channel| channel.writable_frames() < frames)
        {
            thread::sleep(Duration::from_millis(2));
        }
    })
    .context("Playback failed")?;

    // Let the ring drain before the channel goes away
    thread::sleep(Duration::from_millis(u64::from(buffer_ms)));
    handler.close();
    Ok(())
}

#[cfg(feature = "jack-backend")]
mod jack {
    use super::*;
    use mt32drv::bridge::clock::{MasterClock, SystemClock};
    use mt32drv::bridge::jack::JackTransport;
    use mt32drv::bridge::{DriverConfig, JackMidiDriver};
    use mt32drv::config::JackSection;
    use mt32drv::player::forward_due;
    use std::io::BufRead;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Frames rendered per step while following live input.
    const LIVE_CHUNK_FRAMES: usize = 256;

    pub fn run(options: &Mt32Options, section: &JackSection, ports: Option<usize>) -> Result<()> {
        let clock: Arc<dyn MasterClock> = Arc::new(SystemClock::new());
        let mut config = DriverConfig::from_section(section);
        if let Some(ports) = ports {
            config.ports = ports.max(1);
        }

        let mut handler = Mt32Handler::new(
            MuntEngine::new,
            StreamMixer::new().context("Failed to open audio output")?,
        );
        handler.open(options).context("Failed to open MT-32 backend")?;

        let driver = JackMidiDriver::new(
            JackTransport::new(Arc::clone(&clock)),
            config,
            Arc::clone(&clock),
        );
        let mut receivers = driver.start().context("Failed to start JACK MIDI driver")?;

        let running = Arc::new(AtomicBool::new(true));
        let stdin_flag = Arc::clone(&running);
        thread::spawn(move || {
            for _ in std::io::stdin().lock().lines() {}
            stdin_flag.store(false, Ordering::Relaxed);
        });
        eprintln!("Listening on JACK MIDI; press Ctrl-D to quit.");

        while running.load(Ordering::Relaxed) {
            forward_due(&mut handler, &mut receivers, clock.now())?;
            let room = handler.channel().map_or(0, |c| c.writable_frames());
            if room >= LIVE_CHUNK_FRAMES {
                handler.render(LIVE_CHUNK_FRAMES)?;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }

        driver.stop()?;
        for session in &receivers {
            tracing::debug!("Session {} had {} events left", session.name(), session.pending());
        }
        handler.close();
        Ok(())
    }
}
