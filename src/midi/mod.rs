//! MIDI data structures shared by the synth adapter and the session bridge.
//!
//! This module provides the tagged message model used at every translation
//! boundary, plus Standard MIDI File loading for offline and live playback.

pub mod message;
pub mod smf;

pub use message::{InvalidMessage, MidiMessage, OwnedMessage, ShortMessage};
pub use smf::{load_score, Score, ScoreEvent, SmfError};
