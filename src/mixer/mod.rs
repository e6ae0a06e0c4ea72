//! Host mixer seam.
//!
//! The synth adapter is a producer: it registers a channel with a [`Mixer`],
//! and whenever the host asks for audio it renders frames and pushes them into
//! that channel. The mixer owns what happens next (file output, device output,
//! mixing with other sources).
//!
//! Two hosts are provided:
//! - [`wav::WavMixer`] writes each channel to a 16-bit stereo WAV file
//! - [`stream::StreamMixer`] plays channels live through the default output device

pub mod stream;
pub mod wav;

use thiserror::Error;

pub use stream::StreamMixer;
pub use wav::WavMixer;

/// Errors raised by mixer hosts.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("WAV output failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("Audio output unavailable: {0}")]
    Output(String),
    #[error("Sample buffer of {samples} samples does not hold {frames} stereo frames")]
    ShortBuffer { frames: usize, samples: usize },
}

/// A host audio mixer that producers register channels with.
pub trait Mixer {
    type Channel: MixerChannel;

    /// Registers a new stereo channel running at `sample_rate`.
    ///
    /// Channels start disabled.
    fn add_channel(&mut self, name: &str, sample_rate: u32) -> Result<Self::Channel, MixerError>;

    /// Unregisters a channel, flushing anything it buffered.
    fn del_channel(&mut self, channel: Self::Channel) -> Result<(), MixerError>;
}

/// A producer's handle on its registered channel.
pub trait MixerChannel {
    /// Enables or disables the channel. Disabled channels discard samples.
    fn enable(&mut self, enabled: bool);

    /// Accepts `frames` interleaved stereo frames from `samples`.
    ///
    /// Called from the render path: implementations must not block.
    fn add_samples_s16(&mut self, frames: usize, samples: &[i16]) -> Result<(), MixerError>;
}

/// Checks that `samples` covers `frames` stereo frames.
pub(crate) fn stereo_slice(frames: usize, samples: &[i16]) -> Result<&[i16], MixerError> {
    samples
        .get(..frames * 2)
        .ok_or(MixerError::ShortBuffer {
            frames,
            samples: samples.len(),
        })
}
