//! Standard MIDI File (SMF) loading.
//!
//! Flattens a .mid file into a [`Score`]: every channel message and sysex
//! block from every track, merged in time order and stamped with the output
//! frame at which it should reach the synth.
//!
//! # Limitations
//!
//! - SMF Format 2 (sequential) and SMPTE timecode timing are rejected
//! - Sysex split across escape packets is skipped
//! - Meta events other than tempo are ignored

use super::message::{OwnedMessage, ShortMessage, SYSEX_END, SYSEX_START};
use midly::{Format, MetaMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default tempo (120 BPM) in microseconds per quarter note.
const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

/// Errors that can occur while loading a MIDI file.
#[derive(Debug, Error)]
pub enum SmfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// A message scheduled at an absolute output frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEvent {
    pub frame: u64,
    pub message: OwnedMessage,
}

/// A time-ordered list of messages ready for playback at a fixed sample rate.
#[derive(Debug, Clone, Default)]
pub struct Score {
    pub sample_rate: u32,
    pub events: Vec<ScoreEvent>,
}

impl Score {
    /// Frame of the last event, or 0 for an empty score.
    pub fn length_frames(&self) -> u64 {
        self.events.last().map_or(0, |e| e.frame)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Loads a MIDI file and schedules it at `sample_rate`.
///
/// # Arguments
///
/// * `path` - Path to the .mid or .midi file
/// * `sample_rate` - Output rate the frame stamps are computed for
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed, or uses a format
/// that cannot be flattened into a single timeline.
pub fn load_score<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Score, SmfError> {
    let data = fs::read(path.as_ref())?;
    parse_score(&data, sample_rate)
}

/// Same as [`load_score`] for an in-memory file.
pub fn parse_score(data: &[u8], sample_rate: u32) -> Result<Score, SmfError> {
    let smf = Smf::parse(data)?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => u64::from(tpb.as_int().max(1)),
        Timing::Timecode(_, _) => {
            return Err(SmfError::UnsupportedFormat(
                "SMPTE timecode timing not supported".to_string(),
            ))
        }
    };
    if smf.header.format == Format::Sequential {
        return Err(SmfError::UnsupportedFormat(
            "Format 2 (sequential) MIDI files not supported".to_string(),
        ));
    }

    // (absolute tick, track index, event) - sorted stably so events at the
    // same tick keep track order, then file order
    let mut merged = Vec::new();
    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut tick = 0u64;
        for event in track {
            tick += u64::from(event.delta.as_int());
            merged.push((tick, track_idx, event.kind));
        }
    }
    merged.sort_by_key(|(tick, track_idx, _)| (*tick, *track_idx));

    let mut events = Vec::with_capacity(merged.len());
    let mut usec_per_beat = DEFAULT_USEC_PER_BEAT;
    let mut last_tick = 0u64;
    let mut elapsed_usec = 0f64;

    for (tick, _, kind) in merged {
        elapsed_usec += (tick - last_tick) as f64 * f64::from(usec_per_beat) / ticks_per_beat as f64;
        last_tick = tick;
        let frame = (elapsed_usec * f64::from(sample_rate) / 1_000_000.0).round() as u64;

        match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                let value = tempo.as_int();
                if value > 0 {
                    usec_per_beat = value;
                }
            }
            TrackEventKind::Midi { channel, message } => {
                events.push(ScoreEvent {
                    frame,
                    message: OwnedMessage::Short(short_message(channel.as_int(), message)),
                });
            }
            TrackEventKind::SysEx(body) => {
                if body.last() != Some(&SYSEX_END) {
                    tracing::debug!("Skipping partial sysex packet ({} bytes)", body.len());
                    continue;
                }
                let mut bytes = Vec::with_capacity(body.len() + 1);
                bytes.push(SYSEX_START);
                bytes.extend_from_slice(body);
                events.push(ScoreEvent {
                    frame,
                    message: OwnedMessage::Sysex(bytes.into_boxed_slice()),
                });
            }
            _ => {}
        }
    }

    Ok(Score {
        sample_rate,
        events,
    })
}

/// Converts a midly channel message into its wire form.
fn short_message(channel: u8, message: midly::MidiMessage) -> ShortMessage {
    use midly::MidiMessage as M;

    let ch = channel & 0x0F;
    match message {
        M::NoteOff { key, vel } => ShortMessage::new(0x80 | ch, key.as_int(), vel.as_int()),
        M::NoteOn { key, vel } => ShortMessage::new(0x90 | ch, key.as_int(), vel.as_int()),
        M::Aftertouch { key, vel } => ShortMessage::new(0xA0 | ch, key.as_int(), vel.as_int()),
        M::Controller { controller, value } => {
            ShortMessage::new(0xB0 | ch, controller.as_int(), value.as_int())
        }
        M::ProgramChange { program } => ShortMessage::new(0xC0 | ch, program.as_int(), 0),
        M::ChannelAftertouch { vel } => ShortMessage::new(0xD0 | ch, vel.as_int(), 0),
        M::PitchBend { bend } => {
            let raw = bend.0.as_int();
            ShortMessage::new(0xE0 | ch, (raw & 0x7F) as u8, (raw >> 7) as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a format-0 file with 96 ticks per beat from a raw track body.
    fn single_track_file(track: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd");
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes()); // format 0
        data.extend_from_slice(&1u16.to_be_bytes()); // one track
        data.extend_from_slice(&96u16.to_be_bytes());
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(track.len() as u32).to_be_bytes());
        data.extend_from_slice(track);
        data
    }

    #[test]
    fn test_default_tempo_schedule() {
        let track = [
            0x00, 0x90, 60, 100, // note on at tick 0
            0x60, 0x80, 60, 0, // note off one beat later
            0x00, 0xFF, 0x2F, 0x00, // end of track
        ];
        let score = parse_score(&single_track_file(&track), 32_000).unwrap();

        assert_eq!(score.events.len(), 2);
        assert_eq!(score.events[0].frame, 0);
        assert_eq!(
            score.events[0].message,
            OwnedMessage::Short(ShortMessage::new(0x90, 60, 100))
        );
        // One beat at 120 BPM is half a second
        assert_eq!(score.events[1].frame, 16_000);
        assert_eq!(score.length_frames(), 16_000);
    }

    #[test]
    fn test_tempo_change_applies_after_event() {
        let track = [
            0x00, 0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40, // 1 s per beat
            0x60, 0xC0, 0x05, // program change one beat later
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let score = parse_score(&single_track_file(&track), 32_000).unwrap();

        assert_eq!(score.events.len(), 1);
        assert_eq!(score.events[0].frame, 32_000);
    }

    #[test]
    fn test_sysex_gets_start_byte() {
        let track = [
            0x00, 0xF0, 0x03, 0x41, 0x10, 0xF7, // sysex, length 3
            0x00, 0xFF, 0x2F, 0x00,
        ];
        let score = parse_score(&single_track_file(&track), 32_000).unwrap();

        assert_eq!(
            score.events[0].message,
            OwnedMessage::Sysex(vec![0xF0, 0x41, 0x10, 0xF7].into_boxed_slice())
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            parse_score(b"not a midi file", 32_000),
            Err(SmfError::Parse(_))
        ));
    }
}
