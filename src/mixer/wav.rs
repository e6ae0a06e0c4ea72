//! WAV file mixer host.
//!
//! Renders land in a 16-bit stereo WAV file instead of an audio device,
//! which is how a score is exported offline.

use super::{stereo_slice, Mixer, MixerChannel, MixerError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Mixer writing its single channel to a WAV file.
pub struct WavMixer {
    /// Output file path.
    path: PathBuf,
    /// Whether a channel is currently registered.
    busy: bool,
}

impl WavMixer {
    /// Creates a mixer that will write to `path` once a channel is added.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy: false,
        }
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Channel handle for [`WavMixer`].
pub struct WavChannel {
    writer: WavWriter<BufWriter<File>>,
    enabled: bool,
    frames_written: u64,
}

impl WavChannel {
    /// Number of frames written to the file so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Mixer for WavMixer {
    type Channel = WavChannel;

    fn add_channel(&mut self, name: &str, sample_rate: u32) -> Result<WavChannel, MixerError> {
        if self.busy {
            return Err(MixerError::Output(format!(
                "{} already has a channel, cannot add {}",
                self.path.display(),
                name
            )));
        }

        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)?;
        tracing::info!(
            "Mixer channel {} writing to {} at {} Hz",
            name,
            self.path.display(),
            sample_rate
        );
        self.busy = true;

        Ok(WavChannel {
            writer,
            enabled: false,
            frames_written: 0,
        })
    }

    fn del_channel(&mut self, channel: WavChannel) -> Result<(), MixerError> {
        self.busy = false;
        let frames = channel.frames_written;
        channel.writer.finalize()?;
        tracing::info!("Finalized {} ({} frames)", self.path.display(), frames);
        Ok(())
    }
}

impl MixerChannel for WavChannel {
    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn add_samples_s16(&mut self, frames: usize, samples: &[i16]) -> Result<(), MixerError> {
        let samples = stereo_slice(frames, samples)?;
        if !self.enabled {
            return Ok(());
        }
        for &sample in samples {
            self.writer.write_sample(sample)?;
        }
        self.frames_written += frames as u64;
        Ok(())
    }
}
