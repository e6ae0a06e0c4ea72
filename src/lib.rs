//! mt32drv - MT-32 synth backend and MIDI transport bridge.
//!
//! This library provides the glue between a host audio application and two
//! external systems: an MT-32 emulation engine (ROM discovery, session setup,
//! MIDI forwarding, rendering into a mixer channel) and a low-latency MIDI
//! transport (client lifecycle, clock translation, session delivery).

pub mod bridge;
pub mod config;
pub mod midi;
pub mod mixer;
pub mod player;
pub mod synth;

// Re-export commonly used types
pub use bridge::{DriverConfig, DriverState, JackMidiDriver, Transport};
pub use config::{Config, Mt32Options};
pub use midi::{MidiMessage, ShortMessage};
pub use mixer::{Mixer, MixerChannel};
pub use synth::{Engine, Mt32Error, Mt32Handler, ReportHandler};
