//! Live output mixer host.
//!
//! Each channel is a lock-free SPSC ring: the render path pushes i16 frames on
//! one side, and a rodio [`Source`] on the audio thread pops them on the
//! other. The source plays silence on underrun and ends once the channel is
//! deleted and drained.

use super::{stereo_slice, Mixer, MixerChannel, MixerError};
use rodio::{OutputStream, OutputStreamHandle, Source};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default ring size, in milliseconds of audio.
const DEFAULT_BUFFER_MS: u32 = 100;

/// State shared between a channel and its source.
/// Uses atomics for lock-free access from the audio thread.
#[derive(Debug, Default)]
struct SharedState {
    /// Channel enabled by the producer.
    enabled: AtomicBool,
    /// Channel deleted; the source ends once drained.
    closed: AtomicBool,
    /// Frames dropped because the ring was full.
    overruns: AtomicU64,
    /// Frames of silence played because the ring was empty.
    underruns: AtomicU64,
}

/// Producer side of a live channel.
pub struct StreamChannel {
    producer: Producer<i16>,
    state: Arc<SharedState>,
}

impl StreamChannel {
    /// Frames that can be pushed right now without dropping anything.
    pub fn writable_frames(&self) -> usize {
        self.producer.slots() / 2
    }

    /// Frames dropped so far because the consumer fell behind.
    pub fn overruns(&self) -> u64 {
        self.state.overruns.load(Ordering::Relaxed)
    }

    /// Frames of silence the consumer had to play.
    pub fn underruns(&self) -> u64 {
        self.state.underruns.load(Ordering::Relaxed)
    }
}

impl MixerChannel for StreamChannel {
    fn enable(&mut self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::Relaxed);
    }

    fn add_samples_s16(&mut self, frames: usize, samples: &[i16]) -> Result<(), MixerError> {
        let samples = stereo_slice(frames, samples)?;
        if !self.state.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        // Whole frames only, so the consumer never sees half a frame
        let fit = self.writable_frames().min(frames);
        if fit > 0 {
            if let Ok(chunk) = self.producer.write_chunk_uninit(fit * 2) {
                chunk.fill_from_iter(samples[..fit * 2].iter().copied());
            }
        }
        if fit < frames {
            self.state
                .overruns
                .fetch_add((frames - fit) as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Consumer side of a live channel, played by rodio.
pub struct RingSource {
    consumer: Consumer<i16>,
    state: Arc<SharedState>,
    sample_rate: u32,
    /// Right sample of the frame currently being emitted.
    right: f32,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl Iterator for RingSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.channel == 1 {
            self.channel = 0;
            return Some(self.right);
        }

        let (left, right) = if self.consumer.slots() >= 2 {
            let left = self.consumer.pop().unwrap_or(0);
            let right = self.consumer.pop().unwrap_or(0);
            (left, right)
        } else if self.state.closed.load(Ordering::Acquire) {
            return None;
        } else {
            self.state.underruns.fetch_add(1, Ordering::Relaxed);
            (0, 0)
        };

        self.right = to_f32(right);
        self.channel = 1;
        Some(to_f32(left))
    }
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2 // Stereo
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Ends when the channel is deleted
    }
}

fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Creates a connected channel/source pair holding up to `capacity_frames`.
pub fn ring_channel(sample_rate: u32, capacity_frames: usize) -> (StreamChannel, RingSource) {
    let (producer, consumer) = RingBuffer::new(capacity_frames.max(1) * 2);
    let state = Arc::new(SharedState::default());
    (
        StreamChannel {
            producer,
            state: Arc::clone(&state),
        },
        RingSource {
            consumer,
            state,
            sample_rate,
            right: 0.0,
            channel: 0,
        },
    )
}

/// Mixer playing its channels on the default output device.
pub struct StreamMixer {
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    /// Audio output handle for playback.
    stream_handle: OutputStreamHandle,
    /// Ring size per channel, in milliseconds.
    buffer_ms: u32,
}

impl StreamMixer {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns [`MixerError::Output`] if no output device can be opened.
    pub fn new() -> Result<Self, MixerError> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| MixerError::Output(e.to_string()))?;
        Ok(Self {
            _stream: stream,
            stream_handle,
            buffer_ms: DEFAULT_BUFFER_MS,
        })
    }

    /// Sets the per-channel ring size used by later `add_channel` calls.
    pub fn with_buffer_ms(mut self, buffer_ms: u32) -> Self {
        self.buffer_ms = buffer_ms.max(1);
        self
    }
}

impl Mixer for StreamMixer {
    type Channel = StreamChannel;

    fn add_channel(&mut self, name: &str, sample_rate: u32) -> Result<StreamChannel, MixerError> {
        let capacity = (u64::from(sample_rate) * u64::from(self.buffer_ms) / 1000) as usize;
        let (channel, source) = ring_channel(sample_rate, capacity);
        self.stream_handle
            .play_raw(source)
            .map_err(|e| MixerError::Output(e.to_string()))?;
        tracing::info!(
            "Mixer channel {} streaming at {} Hz ({} frame ring)",
            name,
            sample_rate,
            capacity
        );
        Ok(channel)
    }

    fn del_channel(&mut self, channel: StreamChannel) -> Result<(), MixerError> {
        let (overruns, underruns) = (channel.overruns(), channel.underruns());
        channel.state.closed.store(true, Ordering::Release);
        if overruns > 0 || underruns > 0 {
            tracing::warn!(
                "Mixer channel closed with {} dropped and {} silent frames",
                overruns,
                underruns
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_come_out_interleaved() {
        let (mut channel, mut source) = ring_channel(32_000, 8);
        channel.enable(true);
        channel
            .add_samples_s16(2, &[16384, -16384, 0, 8192])
            .unwrap();

        let out: Vec<f32> = source.by_ref().take(4).collect();
        assert_eq!(out, vec![0.5, -0.5, 0.0, 0.25]);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 32_000);
    }

    #[test]
    fn test_underrun_plays_silent_frames() {
        let (mut channel, mut source) = ring_channel(32_000, 8);
        channel.enable(true);

        assert_eq!(source.next(), Some(0.0));
        assert_eq!(source.next(), Some(0.0));
        assert_eq!(channel.underruns(), 1);

        channel.add_samples_s16(1, &[16384, 16384]).unwrap();
        assert_eq!(source.next(), Some(0.5));
    }

    #[test]
    fn test_disabled_channel_discards() {
        let (mut channel, _source) = ring_channel(32_000, 8);
        channel.add_samples_s16(2, &[1, 1, 1, 1]).unwrap();
        assert_eq!(channel.writable_frames(), 8);
    }

    #[test]
    fn test_overrun_drops_whole_frames() {
        let (mut channel, mut source) = ring_channel(32_000, 2);
        channel.enable(true);
        channel.add_samples_s16(3, &[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(channel.overruns(), 1);
        assert_eq!(channel.writable_frames(), 0);
        let out: Vec<f32> = source.by_ref().take(4).collect();
        assert_eq!(out, vec![to_f32(1), to_f32(2), to_f32(3), to_f32(4)]);
    }

    #[test]
    fn test_source_ends_after_close_and_drain() {
        let (mut channel, mut source) = ring_channel(32_000, 4);
        channel.enable(true);
        channel.add_samples_s16(1, &[1, 2]).unwrap();
        channel.state.closed.store(true, Ordering::Release);

        assert_eq!(source.next(), Some(to_f32(1)));
        assert_eq!(source.next(), Some(to_f32(2)));
        assert_eq!(source.next(), None);
    }
}
