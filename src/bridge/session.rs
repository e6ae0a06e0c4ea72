//! MIDI sessions: where transport events enter the host.
//!
//! A session is split in three:
//! - [`MidiSession`] lives on the transport's real-time thread and validates
//!   and queues incoming messages
//! - [`SessionReceiver`] lives with the synth and pops messages as they fall due
//! - [`SessionHandle`] stays with the driver so the control thread can close
//!   the session and read its counters
//!
//! The queue between the first two is a lock-free SPSC ring, so delivery
//! never blocks. Closing is an atomic flag: once it is cleared, deliveries
//! are rejected and counted as dropped instead of waiting on anything.

use super::clock::{MasterClock, MasterClockNanos};
use crate::midi::{InvalidMessage, MidiMessage, OwnedMessage};
use rtrb::{Consumer, Producer, RingBuffer};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a message was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("session is closed")]
    SessionClosed,
    #[error("invalid message: {0}")]
    Invalid(#[from] InvalidMessage),
    #[error("timestamp is {lag_nanos} ns in the past")]
    Late { lag_nanos: i64 },
    #[error("session queue is full")]
    QueueFull,
}

/// A validated message waiting for its master clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMidiEvent {
    pub timestamp: MasterClockNanos,
    pub message: OwnedMessage,
}

#[derive(Debug)]
struct SessionShared {
    name: String,
    open: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of a session, owned by the transport thread.
pub struct MidiSession {
    shared: Arc<SessionShared>,
    producer: Producer<TimedMidiEvent>,
    clock: Arc<dyn MasterClock>,
    late_tolerance: MasterClockNanos,
}

impl MidiSession {
    /// Creates an open session and its receiving end.
    ///
    /// # Arguments
    ///
    /// * `name` - Session name, usually the endpoint it belongs to
    /// * `capacity` - Number of events the queue holds
    /// * `late_tolerance` - How old a timestamp may be and still be queued
    /// * `clock` - Master clock used for the lateness check
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        late_tolerance: Duration,
        clock: Arc<dyn MasterClock>,
    ) -> (MidiSession, SessionReceiver) {
        let (producer, consumer) = RingBuffer::new(capacity.max(1));
        let shared = Arc::new(SessionShared {
            name: name.into(),
            open: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let late_tolerance =
            i64::try_from(late_tolerance.as_nanos()).unwrap_or(MasterClockNanos::MAX);

        (
            MidiSession {
                shared: Arc::clone(&shared),
                producer,
                clock,
                late_tolerance,
            },
            SessionReceiver { shared, consumer },
        )
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// A handle for closing the session from another thread.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Validates `bytes` and queues it for playback at `timestamp`.
    ///
    /// # Errors
    ///
    /// Rejects the message if the session is closed, the buffer is not a
    /// well-formed short message or sysex block, the timestamp is older than
    /// the late tolerance, or the queue is full. Every rejection is counted.
    pub fn deliver_message(
        &mut self,
        timestamp: MasterClockNanos,
        bytes: &[u8],
    ) -> Result<(), DeliveryError> {
        let result = self.try_deliver(timestamp, bytes);
        let counter = match result {
            Ok(()) => &self.shared.delivered,
            Err(_) => &self.shared.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Queues `bytes` for immediate playback.
    pub fn play_message(&mut self, bytes: &[u8]) -> Result<(), DeliveryError> {
        let now = self.clock.now();
        self.deliver_message(now, bytes)
    }

    fn try_deliver(&mut self, timestamp: MasterClockNanos, bytes: &[u8]) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::SessionClosed);
        }
        let message = MidiMessage::parse(bytes)?;

        let lag_nanos = self.clock.now().saturating_sub(timestamp);
        if lag_nanos > self.late_tolerance {
            return Err(DeliveryError::Late { lag_nanos });
        }

        self.producer
            .push(TimedMidiEvent {
                timestamp,
                message: message.into(),
            })
            .map_err(|_| DeliveryError::QueueFull)
    }
}

impl fmt::Debug for MidiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiSession")
            .field("name", &self.shared.name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Consumer side of a session.
pub struct SessionReceiver {
    shared: Arc<SessionShared>,
    consumer: Consumer<TimedMidiEvent>,
}

impl fmt::Debug for SessionReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReceiver")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl SessionReceiver {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }

    /// Pops the next event if its timestamp is at or before `now`.
    pub fn next_due(&mut self, now: MasterClockNanos) -> Option<TimedMidiEvent> {
        let due = matches!(self.consumer.peek(), Ok(event) if event.timestamp <= now);
        if due {
            self.consumer.pop().ok()
        } else {
            None
        }
    }

    /// Hands every event due at `now` to `f`, in queue order.
    ///
    /// # Returns
    ///
    /// Number of events handed over.
    pub fn drain_due<F>(&mut self, now: MasterClockNanos, mut f: F) -> usize
    where
        F: FnMut(MidiMessage<'_>),
    {
        let mut count = 0;
        while let Some(event) = self.next_due(now) {
            f(event.message.as_message());
            count += 1;
        }
        count
    }
}

/// Control-thread view of a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Stops accepting messages. Later deliveries are dropped and counted.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
    }

    /// Messages accepted so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Messages rejected so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::midi::ShortMessage;
    use std::sync::atomic::AtomicI64;

    /// Clock that only moves when told to.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock(AtomicI64);

    impl ManualClock {
        pub(crate) fn at(nanos: MasterClockNanos) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(nanos)))
        }

        pub(crate) fn set(&self, nanos: MasterClockNanos) {
            self.0.store(nanos, Ordering::Relaxed);
        }
    }

    impl MasterClock for ManualClock {
        fn now(&self) -> MasterClockNanos {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn session(clock: &Arc<ManualClock>, capacity: usize) -> (MidiSession, SessionReceiver) {
        MidiSession::new(
            "test",
            capacity,
            Duration::from_millis(10),
            Arc::clone(clock) as Arc<dyn MasterClock>,
        )
    }

    #[test]
    fn test_deliver_and_drain_in_time_order() {
        let clock = ManualClock::at(1_000_000_000);
        let (mut session, mut receiver) = session(&clock, 8);

        session
            .deliver_message(1_000_000_000, &[0x90, 60, 100])
            .unwrap();
        session
            .deliver_message(1_500_000_000, &[0x80, 60, 0])
            .unwrap();
        assert_eq!(receiver.pending(), 2);

        let mut seen = Vec::new();
        let count = receiver.drain_due(clock.now(), |msg| {
            if let MidiMessage::Short(short) = msg {
                seen.push(short);
            }
        });
        assert_eq!(count, 1);
        assert_eq!(seen, vec![ShortMessage::new(0x90, 60, 100)]);

        clock.set(1_500_000_000);
        let event = receiver.next_due(clock.now()).unwrap();
        assert_eq!(event.timestamp, 1_500_000_000);
        assert_eq!(receiver.pending(), 0);
        assert_eq!(session.handle().delivered(), 2);
    }

    #[test]
    fn test_rejects_invalid_messages() {
        let clock = ManualClock::at(0);
        let (mut session, receiver) = session(&clock, 8);

        assert_eq!(
            session.deliver_message(0, &[0x90, 60]),
            Err(DeliveryError::Invalid(InvalidMessage::Length {
                status: 0x90,
                expected: 3,
                actual: 2
            }))
        );
        assert_eq!(
            session.deliver_message(0, &[0xF0, 0x41]),
            Err(DeliveryError::Invalid(InvalidMessage::UnterminatedSysex(2)))
        );
        assert_eq!(receiver.pending(), 0);
        assert_eq!(session.handle().dropped(), 2);
    }

    #[test]
    fn test_late_tolerance() {
        let clock = ManualClock::at(100_000_000);
        let (mut session, _receiver) = session(&clock, 8);

        // 5 ms late is inside the 10 ms tolerance
        assert!(session.deliver_message(95_000_000, &[0xF8]).is_ok());
        assert_eq!(
            session.deliver_message(80_000_000, &[0xF8]),
            Err(DeliveryError::Late {
                lag_nanos: 20_000_000
            })
        );
    }

    #[test]
    fn test_closed_session_drops() {
        let clock = ManualClock::at(0);
        let (mut session, receiver) = session(&clock, 8);
        let handle = session.handle();

        handle.close();
        assert!(!receiver.is_open());
        assert_eq!(
            session.play_message(&[0x90, 60, 100]),
            Err(DeliveryError::SessionClosed)
        );
        assert_eq!(handle.dropped(), 1);
        assert_eq!(handle.delivered(), 0);
    }

    #[test]
    fn test_full_queue() {
        let clock = ManualClock::at(0);
        let (mut session, _receiver) = session(&clock, 1);

        session.play_message(&[0xFE]).unwrap();
        assert_eq!(
            session.play_message(&[0xFE]),
            Err(DeliveryError::QueueFull)
        );
    }

    #[test]
    fn test_sysex_survives_queue() {
        let clock = ManualClock::at(0);
        let (mut session, mut receiver) = session(&clock, 4);
        let sysex = [0xF0, 0x41, 0x10, 0x16, 0x12, 0x10, 0x00, 0x01, 0x02, 0x6D, 0xF7];

        session.play_message(&sysex).unwrap();
        let mut got = Vec::new();
        receiver.drain_due(0, |msg| {
            if let MidiMessage::Sysex(bytes) = msg {
                got.extend_from_slice(bytes);
            }
        });
        assert_eq!(got, sysex);
    }
}
