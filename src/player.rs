//! Drives an [`Mt32Handler`] from a score or from live sessions.
//!
//! The synth only renders when asked, so something has to interleave
//! "forward the events that are due" with "render up to the next event".
//! [`play_score`] does that for a loaded MIDI file; [`forward_due`] does the
//! event half for sessions fed by the bridge.

use crate::bridge::clock::MasterClockNanos;
use crate::bridge::session::SessionReceiver;
use crate::midi::Score;
use crate::mixer::Mixer;
use crate::synth::{EngineFactory, Mt32Error, Mt32Handler};

/// Largest render request issued at once.
pub const CHUNK_FRAMES: usize = 1024;

/// Seconds of audio rendered after the last event so notes can release.
pub const RELEASE_TAIL_SECONDS: u64 = 2;

/// Plays a whole score through the handler.
///
/// # Arguments
///
/// * `handler` - An open handler
/// * `score` - Events stamped in frames at the handler's sample rate
/// * `pace` - Called with the handler and the chunk size before each render;
///   live output uses it to wait for room in the channel
///
/// # Returns
///
/// Total frames rendered.
///
/// # Errors
///
/// Stops at the first forward or render failure.
pub fn play_score<F, M, P>(
    handler: &mut Mt32Handler<F, M>,
    score: &Score,
    mut pace: P,
) -> Result<u64, Mt32Error>
where
    F: EngineFactory,
    M: Mixer,
    P: FnMut(&Mt32Handler<F, M>, usize),
{
    let end = score.length_frames() + RELEASE_TAIL_SECONDS * u64::from(score.sample_rate);
    let mut events = score.events.iter().peekable();
    let mut position = 0u64;

    while position < end {
        while let Some(event) = events.next_if(|e| e.frame <= position) {
            handler.forward(event.message.as_message())?;
        }

        let next_stop = events.peek().map_or(end, |e| e.frame.min(end));
        let frames = (next_stop - position).min(CHUNK_FRAMES as u64) as usize;
        pace(handler, frames);
        handler.render(frames)?;
        position += frames as u64;
    }

    tracing::debug!("Rendered {} frames ({} events)", position, score.events.len());
    Ok(position)
}

/// Forwards every session event due at `now` to the handler.
///
/// # Returns
///
/// Number of events forwarded.
pub fn forward_due<F, M>(
    handler: &mut Mt32Handler<F, M>,
    receivers: &mut [SessionReceiver],
    now: MasterClockNanos,
) -> Result<usize, Mt32Error>
where
    F: EngineFactory,
    M: Mixer,
{
    let mut forwarded = 0;
    for receiver in receivers.iter_mut() {
        while let Some(event) = receiver.next_due(now) {
            handler.forward(event.message.as_message())?;
            forwarded += 1;
        }
    }
    Ok(forwarded)
}
