//! MIDI wire messages.
//!
//! A message is either a channel/system short message (status plus up to two
//! data bytes) or a complete System Exclusive block. Parsing a byte buffer
//! into [`MidiMessage`] is the only place raw lengths are checked; everything
//! downstream works with the tagged form.

use thiserror::Error;

/// Start of System Exclusive.
pub const SYSEX_START: u8 = 0xF0;

/// End of System Exclusive.
pub const SYSEX_END: u8 = 0xF7;

/// Reasons a byte buffer is not a well-formed MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidMessage {
    #[error("empty MIDI buffer")]
    Empty,
    #[error("missing status byte (found data byte {0:#04x})")]
    MissingStatus(u8),
    #[error("undefined status byte {0:#04x}")]
    UndefinedStatus(u8),
    #[error("status {status:#04x} expects {expected} bytes, got {actual}")]
    Length {
        status: u8,
        expected: usize,
        actual: usize,
    },
    #[error("data byte {value:#04x} at offset {offset} has the high bit set")]
    DataOutOfRange { offset: usize, value: u8 },
    #[error("sysex block of {0} bytes is not terminated by 0xF7")]
    UnterminatedSysex(usize),
}

/// Returns the total length in bytes of a short message with the given status,
/// or `None` for status bytes that never start a short message.
pub fn short_message_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(3),
        0xC0..=0xDF => Some(2),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE | 0xFF => Some(1),
        // 0xF0 starts sysex, 0xF7 only terminates sysex; 0xF4, 0xF5, 0xF9 and 0xFD are undefined
        _ => None,
    }
}

/// A short (non-sysex) MIDI message.
///
/// Unused data bytes are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShortMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl ShortMessage {
    /// Creates a message from its status and data bytes.
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    /// Packs the message into the 32-bit form synth engines consume:
    /// status in the low byte, then data1, then data2.
    pub const fn pack(&self) -> u32 {
        self.status as u32 | (self.data1 as u32) << 8 | (self.data2 as u32) << 16
    }

    /// Unpacks a message produced by [`ShortMessage::pack`]. The top byte is ignored.
    pub const fn from_packed(packed: u32) -> Self {
        Self::new(packed as u8, (packed >> 8) as u8, (packed >> 16) as u8)
    }

    /// Reads a message stored as four little-endian bytes, the layout host
    /// MIDI handlers hand over for short messages.
    pub const fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self::from_packed(u32::from_le_bytes(bytes))
    }

    /// Channel (0-15) for channel voice messages.
    pub fn channel(&self) -> Option<u8> {
        (0x80..0xF0).contains(&self.status).then_some(self.status & 0x0F)
    }

    /// Length in bytes on the wire, `0` if the status is not a short-message status.
    pub fn len(&self) -> usize {
        short_message_len(self.status).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parsed MIDI message borrowing its sysex payload from the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage<'a> {
    Short(ShortMessage),
    /// Complete sysex block including the leading `0xF0` and trailing `0xF7`.
    Sysex(&'a [u8]),
}

impl<'a> MidiMessage<'a> {
    /// Validates a byte buffer and classifies it.
    ///
    /// Running status is not supported: every buffer must start with a status byte.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidMessage`] if the buffer is empty, does not start with a
    /// status byte, has the wrong length for its status, carries a data byte
    /// with the high bit set, or is an unterminated sysex block.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, InvalidMessage> {
        let (&status, data) = bytes.split_first().ok_or(InvalidMessage::Empty)?;

        if status < 0x80 {
            return Err(InvalidMessage::MissingStatus(status));
        }

        if status == SYSEX_START {
            let (&last, body) = data
                .split_last()
                .ok_or(InvalidMessage::UnterminatedSysex(bytes.len()))?;
            if last != SYSEX_END {
                return Err(InvalidMessage::UnterminatedSysex(bytes.len()));
            }
            check_data_bytes(body, 1)?;
            return Ok(MidiMessage::Sysex(bytes));
        }

        let expected = short_message_len(status).ok_or(InvalidMessage::UndefinedStatus(status))?;
        if bytes.len() != expected {
            return Err(InvalidMessage::Length {
                status,
                expected,
                actual: bytes.len(),
            });
        }
        check_data_bytes(data, 1)?;

        Ok(MidiMessage::Short(ShortMessage::new(
            status,
            data.first().copied().unwrap_or(0),
            data.get(1).copied().unwrap_or(0),
        )))
    }

    pub fn is_sysex(&self) -> bool {
        matches!(self, MidiMessage::Sysex(_))
    }
}

fn check_data_bytes(data: &[u8], base_offset: usize) -> Result<(), InvalidMessage> {
    match data.iter().position(|&b| b >= 0x80) {
        Some(i) => Err(InvalidMessage::DataOutOfRange {
            offset: base_offset + i,
            value: data[i],
        }),
        None => Ok(()),
    }
}

/// An owned message, for queues that outlive the source buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedMessage {
    Short(ShortMessage),
    Sysex(Box<[u8]>),
}

impl OwnedMessage {
    /// Borrows the message in its parsed form.
    pub fn as_message(&self) -> MidiMessage<'_> {
        match self {
            OwnedMessage::Short(msg) => MidiMessage::Short(*msg),
            OwnedMessage::Sysex(bytes) => MidiMessage::Sysex(bytes),
        }
    }
}

impl From<MidiMessage<'_>> for OwnedMessage {
    fn from(msg: MidiMessage<'_>) -> Self {
        match msg {
            MidiMessage::Short(short) => OwnedMessage::Short(short),
            MidiMessage::Sysex(bytes) => OwnedMessage::Sysex(bytes.into()),
        }
    }
}
