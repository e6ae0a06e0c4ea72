//! MT-32 MIDI output backend.
//!
//! [`Mt32Handler`] is the session adapter between a host's MIDI output and
//! an MT-32 engine: it finds the ROMs, opens the engine with the configured
//! overrides, registers a mixer channel at the engine's rate, forwards
//! messages, and renders on the mixer's request.

use super::rom::{RomDir, RomRole};
use super::{
    Engine, EngineFactory, Mt32Error, ReportHandler, SAMPLE_RATE, SYSEX_SYSTEM_CHANNEL,
};
use crate::config::Mt32Options;
use crate::midi::{MidiMessage, ShortMessage};
use crate::mixer::{Mixer, MixerChannel};

/// Name of the mixer channel the backend registers.
pub const CHANNEL_NAME: &str = "MT32";

/// Frames rendered per engine call. Larger requests are rendered in chunks.
pub const RENDER_BUFFER_FRAMES: usize = 4096;

/// An open engine and the channel it feeds.
struct Session<E, C> {
    engine: E,
    channel: C,
}

/// MIDI output backend driving an MT-32 engine.
///
/// Exactly one engine exists while the handler is open, none while closed.
/// `render` and `forward` are only valid in between; the caller is expected
/// to finish `open` before the mixer starts asking for samples.
pub struct Mt32Handler<F: EngineFactory, M: Mixer> {
    /// Builds a fresh engine on every open.
    factory: F,
    /// Host mixer the channel is registered with.
    mixer: M,
    /// Present while open.
    session: Option<Session<F::Engine, M::Channel>>,
    /// Scratch buffer for the render path, allocated once.
    render_buf: Vec<i16>,
    /// Report sink override; defaults to logging.
    reports: Option<ReportHandler>,
}

impl<F: EngineFactory, M: Mixer> Mt32Handler<F, M> {
    /// Creates a closed handler.
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates the engine when the handler is opened
    /// * `mixer` - Host mixer the output channel is registered with
    pub fn new(factory: F, mixer: M) -> Self {
        Self {
            factory,
            mixer,
            session: None,
            render_buf: vec![0; RENDER_BUFFER_FRAMES * 2],
            reports: None,
        }
    }

    /// Replaces the default logging report handler given to new engines.
    pub fn with_report_handler(mut self, reports: ReportHandler) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Backend name.
    pub fn name(&self) -> &'static str {
        "mt32"
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Opens the engine and registers the output channel.
    ///
    /// On failure nothing stays behind: no engine, no channel.
    ///
    /// # Errors
    ///
    /// - [`Mt32Error::AlreadyOpen`] if called while open (the running session is kept)
    /// - [`Mt32Error::RomNotFound`] if either ROM is missing under both names
    /// - [`Mt32Error::EngineInit`] if the engine rejects the ROMs
    /// - [`Mt32Error::Mixer`] if the mixer refuses the channel
    pub fn open(&mut self, options: &Mt32Options) -> Result<(), Mt32Error> {
        if self.session.is_some() {
            return Err(Mt32Error::AlreadyOpen);
        }

        let rom_dir = RomDir::new(&options.romdir);
        let control_rom = rom_dir.load(RomRole::Control)?;
        let pcm_rom = rom_dir.load(RomRole::Pcm)?;

        let reports = self
            .reports
            .clone()
            .unwrap_or_else(|| ReportHandler::logging(options.verbose))
            .with_verbose(options.verbose);
        let mut engine = self.factory.create(reports);
        if let Err(e) = engine.open(&control_rom, &pcm_rom) {
            tracing::error!("MT32: Error initialising emulation: {}", e);
            return Err(Mt32Error::EngineInit(e));
        }

        match options.reverb {
            Some(reverb) => {
                engine.write_sysex(SYSEX_SYSTEM_CHANNEL, &reverb.sysex());
                engine.set_reverb_overridden(true);
            }
            None => tracing::info!("MT32: Using default reverb"),
        }
        if let Some(mode) = options.dac {
            engine.set_dac_input_mode(mode);
        }
        engine.set_reversed_stereo_enabled(options.reversed_stereo);

        let mut channel = match self.mixer.add_channel(CHANNEL_NAME, engine.sample_rate()) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!("MT32: Cannot register mixer channel: {}", e);
                engine.close();
                return Err(e.into());
            }
        };
        channel.enable(true);

        self.session = Some(Session { engine, channel });
        Ok(())
    }

    /// Unregisters the channel and shuts the engine down.
    ///
    /// Does nothing if the handler is not open.
    pub fn close(&mut self) {
        let Some(Session {
            mut engine,
            mut channel,
        }) = self.session.take()
        else {
            return;
        };

        channel.enable(false);
        if let Err(e) = self.mixer.del_channel(channel) {
            tracing::error!("MT32: Failed to remove mixer channel: {}", e);
        }
        engine.close();
    }

    /// Passes a message straight to the engine.
    pub fn forward(&mut self, message: MidiMessage<'_>) -> Result<(), Mt32Error> {
        let session = self.session.as_mut().ok_or(Mt32Error::NotOpen)?;
        match message {
            MidiMessage::Short(msg) => session.engine.play_msg(msg.pack())?,
            MidiMessage::Sysex(sysex) => session.engine.play_sysex(sysex)?,
        }
        Ok(())
    }

    /// Plays a short message stored as four little-endian bytes.
    pub fn forward_packed(&mut self, bytes: [u8; 4]) -> Result<(), Mt32Error> {
        self.forward(MidiMessage::Short(ShortMessage::from_le_bytes(bytes)))
    }

    /// Renders `frames` stereo frames into the mixer channel.
    ///
    /// Meant to be called from the mixer's pull callback: it takes no locks,
    /// does not allocate and does not log.
    pub fn render(&mut self, frames: usize) -> Result<(), Mt32Error> {
        let session = self.session.as_mut().ok_or(Mt32Error::NotOpen)?;

        let mut remaining = frames;
        while remaining > 0 {
            let chunk = remaining.min(RENDER_BUFFER_FRAMES);
            let buf = &mut self.render_buf[..chunk * 2];
            session.engine.render(buf);
            session.channel.add_samples_s16(chunk, buf)?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Output rate of the open engine.
    pub fn sample_rate(&self) -> u32 {
        self.session
            .as_ref()
            .map_or(SAMPLE_RATE, |s| s.engine.sample_rate())
    }

    /// The registered channel, while open.
    pub fn channel(&self) -> Option<&M::Channel> {
        self.session.as_ref().map(|s| &s.channel)
    }

    pub fn mixer(&self) -> &M {
        &self.mixer
    }
}

impl<F: EngineFactory, M: Mixer> Drop for Mt32Handler<F, M> {
    fn drop(&mut self) {
        self.close();
    }
}
