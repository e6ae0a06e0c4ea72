//! MT-32 synth backend.
//!
//! This module wraps an external MT-32 emulation engine as a MIDI output
//! backend. It provides:
//! - ROM discovery with the CM-32L/MT-32 filename fallback ([`rom`])
//! - The engine seam ([`Engine`], [`EngineFactory`]) and its report capability
//! - The session adapter that forwards MIDI and renders into a mixer ([`handler`])
//! - A libmt32emu binding behind the `munt` feature

pub mod handler;
pub mod rom;

#[cfg(feature = "munt")]
pub mod munt;
#[cfg(any(feature = "munt", test))]
mod munt_report;

#[cfg(test)]
pub(crate) mod testing;

use crate::mixer::MixerError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use handler::Mt32Handler;
pub use rom::{RomDir, RomImage, RomRole};

/// Native output rate of the MT-32 engine.
pub const SAMPLE_RATE: u32 = 32_000;

/// MIDI channel address that makes `write_sysex` target the system area.
pub const SYSEX_SYSTEM_CHANNEL: u8 = 16;

/// Errors reported by an [`Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Control ROM rejected: {0}")]
    ControlRom(String),
    #[error("PCM ROM rejected: {0}")]
    PcmRom(String),
    #[error("Engine failed to open: {0}")]
    Open(String),
    #[error("Engine MIDI queue is full")]
    QueueFull,
    #[error("Engine error code {0}")]
    Code(i32),
}

/// Errors raised by [`Mt32Handler`].
#[derive(Debug, Error)]
pub enum Mt32Error {
    #[error("{role} ROM file not found in {dir}")]
    RomNotFound { role: RomRole, dir: String },
    #[error("Error initialising emulation: {0}")]
    EngineInit(EngineError),
    #[error("MT-32 backend is already open")]
    AlreadyOpen,
    #[error("MT-32 backend is not open")]
    NotOpen,
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Mixer error: {0}")]
    Mixer(#[from] MixerError),
}

/// DAC input emulation modes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DacInputMode {
    /// Produces samples at double the volume, without tricks.
    #[default]
    Nice = 0,
    /// Produces samples that exactly match the bits output from the emulated LA32.
    Pure = 1,
    /// Re-orders the LA32 output bits as in an early generation MT-32.
    Generation1 = 2,
    /// Re-orders the LA32 output bits as in a later generation MT-32.
    Generation2 = 3,
}

impl TryFrom<u8> for DacInputMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Self::Nice),
            1 => Ok(Self::Pure),
            2 => Ok(Self::Generation1),
            3 => Ok(Self::Generation2),
            other => Err(other),
        }
    }
}

/// User reverb settings that replace the engine default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverbOverride {
    /// Room, Hall, Plate or Tap delay (0-3).
    pub mode: u8,
    /// Sent to the engine unchanged.
    pub time: u8,
    /// Sent to the engine unchanged.
    pub level: u8,
}

impl ReverbOverride {
    /// System-area sysex body setting reverb mode, time and level, to be
    /// written on [`SYSEX_SYSTEM_CHANNEL`].
    pub fn sysex(&self) -> [u8; 6] {
        [0x10, 0x00, 0x01, self.mode, self.time, self.level]
    }
}

type Notify = Arc<dyn Fn() + Send + Sync>;
type NotifyText = Arc<dyn Fn(&str) + Send + Sync>;
type NotifyFmt = Arc<dyn Fn(fmt::Arguments<'_>) + Send + Sync>;

/// Notification slots an engine calls back into.
///
/// Built from plain functions so any host can plug in its own sink;
/// [`ReportHandler::logging`] sends everything to `tracing`.
#[derive(Clone)]
pub struct ReportHandler {
    on_error_control_rom: Notify,
    on_error_pcm_rom: Notify,
    on_lcd_message: NotifyText,
    on_debug: NotifyFmt,
    verbose: bool,
}

impl ReportHandler {
    /// Reports through `tracing`. Debug traces are only emitted when `verbose`.
    pub fn logging(verbose: bool) -> Self {
        Self {
            on_error_control_rom: Arc::new(|| tracing::error!("MT32: Couldn't open Control ROM file")),
            on_error_pcm_rom: Arc::new(|| tracing::error!("MT32: Couldn't open PCM ROM file")),
            on_lcd_message: Arc::new(|msg| tracing::info!("MT32: LCD-Message: {}", msg)),
            on_debug: Arc::new(|args| tracing::debug!("MT32: {}", args)),
            verbose,
        }
    }

    pub fn with_error_control_rom(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_error_control_rom = Arc::new(f);
        self
    }

    pub fn with_error_pcm_rom(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_error_pcm_rom = Arc::new(f);
        self
    }

    pub fn with_lcd_message(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_lcd_message = Arc::new(f);
        self
    }

    pub fn with_debug(mut self, f: impl Fn(fmt::Arguments<'_>) + Send + Sync + 'static) -> Self {
        self.on_debug = Arc::new(f);
        self
    }

    /// Sets whether debug traces are forwarded.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn error_control_rom(&self) {
        (self.on_error_control_rom)();
    }

    pub fn error_pcm_rom(&self) {
        (self.on_error_pcm_rom)();
    }

    pub fn lcd_message(&self, message: &str) {
        (self.on_lcd_message)(message);
    }

    /// Forwards a debug trace, dropped unless verbose.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if self.verbose {
            (self.on_debug)(args);
        }
    }
}

impl fmt::Debug for ReportHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportHandler")
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// An MT-32 emulation engine instance.
///
/// Messages and renders are only valid between a successful [`Engine::open`]
/// and [`Engine::close`].
pub trait Engine: Send {
    /// Loads both ROM images and starts the emulation.
    fn open(&mut self, control_rom: &RomImage, pcm_rom: &RomImage) -> Result<(), EngineError>;

    fn close(&mut self);

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Plays a short message packed as status | data1 << 8 | data2 << 16.
    fn play_msg(&mut self, msg: u32) -> Result<(), EngineError>;

    /// Plays a complete sysex block (`F0 .. F7`).
    fn play_sysex(&mut self, sysex: &[u8]) -> Result<(), EngineError>;

    /// Writes a sysex body (address + data, no framing or checksum) directly
    /// to the given channel's memory area.
    fn write_sysex(&mut self, channel: u8, sysex: &[u8]);

    /// Keeps the engine from resetting reverb when a patch asks for it.
    fn set_reverb_overridden(&mut self, overridden: bool);

    fn set_dac_input_mode(&mut self, mode: DacInputMode);

    fn set_reversed_stereo_enabled(&mut self, enabled: bool);

    /// Fills `out` with interleaved stereo frames (`out.len() / 2` frames).
    fn render(&mut self, out: &mut [i16]);
}

/// Creates engine instances on demand.
pub trait EngineFactory {
    type Engine: Engine;

    fn create(&mut self, reports: ReportHandler) -> Self::Engine;
}

impl<E, F> EngineFactory for F
where
    E: Engine,
    F: FnMut(ReportHandler) -> E,
{
    type Engine = E;

    fn create(&mut self, reports: ReportHandler) -> E {
        self(reports)
    }
}
