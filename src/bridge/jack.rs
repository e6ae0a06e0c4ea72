//! Native JACK MIDI transport.
//!
//! Every session gets its own JACK client with a single `midi_in` port, so
//! each shows up as a separate endpoint in the JACK graph.
//!
//! # Timing
//!
//! ```text
//!   JACK RT thread                           master clock
//!   ──────────────                           ────────────
//!   event frame = last_frame_time + offset
//!   ref frame   = frame_time()      ◄──────► ref nanos = clock.now()
//!   timestamp   = ref nanos + Δframes·(1e9 / rate) + one period
//! ```
//!
//! Events from the previous period are pushed one period into the future so
//! the synth can play them with the same relative timing they arrived with.

use super::clock::{transport_time_to_master_clock, MasterClock, MasterClockNanos, Timebase};
use super::session::MidiSession;
use super::{Transport, TransportError};
use jack::{AsyncClient, Client, ClientOptions, Control, MidiIn, Port, ProcessScope};
use std::sync::Arc;

/// MIDI input port name on every client.
const MIDI_IN: &str = "midi_in";

/// JACK process handler
///
/// Owns the session producer exclusively; never blocks, never logs.
pub struct MidiInProcessor {
    port: Port<MidiIn>,
    session: MidiSession,
    clock: Arc<dyn MasterClock>,
    timebase: Timebase,
    latency_nanos: MasterClockNanos,
}

impl jack::ProcessHandler for MidiInProcessor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> Control {
        let ref_nanos = self.clock.now();
        let ref_frames = u64::from(client.frame_time());
        let cycle_start = ps.last_frame_time();

        for event in self.port.iter(ps) {
            let event_frames = u64::from(cycle_start.wrapping_add(event.time));
            let timestamp =
                transport_time_to_master_clock(ref_nanos, event_frames, ref_frames, &self.timebase)
                    .saturating_add(self.latency_nanos);
            // Rejections are counted by the session
            let _ = self.session.deliver_message(timestamp, event.bytes);
        }

        Control::Continue
    }
}

/// JACK notification handler
pub struct JackNotifications {
    name: String,
}

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        tracing::info!("JACK client {} sample rate is {}", self.name, srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        tracing::warn!("JACK xrun detected on {}", self.name);
        Control::Continue
    }
}

/// A registered, active JACK client.
pub struct JackClient {
    name: String,
    async_client: AsyncClient<JackNotifications, MidiInProcessor>,
}

/// Transport creating one JACK client per session.
pub struct JackTransport {
    clock: Arc<dyn MasterClock>,
    options: ClientOptions,
}

impl JackTransport {
    /// Creates a transport that never auto-starts a JACK server.
    pub fn new(clock: Arc<dyn MasterClock>) -> Self {
        Self {
            clock,
            options: ClientOptions::NO_START_SERVER,
        }
    }
}

impl Transport for JackTransport {
    type Client = JackClient;

    fn register_client(
        &mut self,
        name: &str,
        session: MidiSession,
    ) -> Result<JackClient, TransportError> {
        // JACK may rename if another client has the same name
        let (client, _status) =
            Client::new(name, self.options).map_err(|e| TransportError::new(name, e))?;
        let actual_name = client.name().to_string();

        let port = client
            .register_port(MIDI_IN, MidiIn::default())
            .map_err(|e| TransportError::new(name, e))?;

        let sample_rate = client.sample_rate() as u32;
        let timebase = Timebase::frames(sample_rate);
        let latency_nanos = timebase.ticks_to_nanos(i64::from(client.buffer_size()));

        tracing::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames)",
            actual_name,
            sample_rate,
            client.buffer_size()
        );

        let processor = MidiInProcessor {
            port,
            session,
            clock: Arc::clone(&self.clock),
            timebase,
            latency_nanos,
        };
        let notifications = JackNotifications {
            name: actual_name.clone(),
        };
        let async_client = client
            .activate_async(notifications, processor)
            .map_err(|e| TransportError::new(name, e))?;

        Ok(JackClient {
            name: actual_name,
            async_client,
        })
    }

    fn unregister_client(&mut self, client: JackClient) {
        if let Err(e) = client.async_client.deactivate() {
            tracing::warn!("Failed to deactivate JACK client {}: {}", client.name, e);
        }
    }
}
