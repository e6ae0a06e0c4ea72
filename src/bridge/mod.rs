//! MIDI session bridge.
//!
//! Connects an external low-latency MIDI transport to host MIDI sessions.
//! The driver registers one transport client per endpoint, each feeding its
//! own [`session::MidiSession`], and hands the matching receivers to the host.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──► Starting ──all clients up──► Running
//!    ▲                     │                           │
//!    └──── rollback ───────┘                        stop()
//!    │                                                 ▼
//!    └───────────────────────────────────────────── Stopping
//! ```
//!
//! Registration happens outside the state lock, so another thread observing
//! the driver mid-start sees `Starting` rather than blocking.

pub mod clock;
pub mod session;

#[cfg(feature = "jack-backend")]
pub mod jack;

use crate::config::JackSection;
use clock::MasterClock;
use session::{MidiSession, SessionHandle, SessionReceiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub use clock::{transport_time_to_master_clock, MasterClockNanos, SystemClock, Timebase};
pub use session::{DeliveryError, TimedMidiEvent};

/// A transport refused to create a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport client {client}: {message}")]
pub struct TransportError {
    pub client: String,
    pub message: String,
}

impl TransportError {
    pub fn new(client: impl Into<String>, message: impl ToString) -> Self {
        Self {
            client: client.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by [`JackMidiDriver`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to register transport client {name}: {source}")]
    Registration {
        name: String,
        #[source]
        source: TransportError,
    },
    #[error("Driver cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: DriverState,
    },
}

/// An external MIDI transport the driver registers clients with.
pub trait Transport: Send {
    /// A live registration. Dropping it without `unregister_client` is allowed
    /// but skips orderly teardown.
    type Client: Send;

    /// Registers a client exposing one MIDI input endpoint that delivers into `session`.
    fn register_client(
        &mut self,
        name: &str,
        session: MidiSession,
    ) -> Result<Self::Client, TransportError>;

    /// Removes a client. Once this returns, the client delivers nothing more.
    fn unregister_client(&mut self, client: Self::Client);
}

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Driver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Client name, suffixed with `-N` when more than one port is configured.
    pub client_name: String,
    /// Number of clients to register.
    pub ports: usize,
    /// Event queue size per session.
    pub queue_capacity: usize,
    /// Oldest timestamp a session still accepts, relative to now.
    pub late_tolerance: Duration,
}

impl DriverConfig {
    pub fn from_section(section: &JackSection) -> Self {
        Self {
            client_name: section.client_name.clone(),
            ports: section.ports.max(1),
            queue_capacity: section.queue_capacity.max(1),
            late_tolerance: Duration::from_millis(section.late_tolerance_ms),
        }
    }

    fn client_name(&self, index: usize) -> String {
        if self.ports == 1 {
            self.client_name.clone()
        } else {
            format!("{}-{}", self.client_name, index + 1)
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_section(&JackSection::default())
    }
}

struct RegisteredClient<C> {
    client: C,
    session: SessionHandle,
}

struct DriverInner<C> {
    state: DriverState,
    clients: Vec<RegisteredClient<C>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MIDI driver bridging a transport's clients to host sessions.
pub struct JackMidiDriver<T: Transport> {
    config: DriverConfig,
    clock: Arc<dyn MasterClock>,
    transport: Mutex<T>,
    inner: Mutex<DriverInner<T::Client>>,
}

impl<T: Transport> JackMidiDriver<T> {
    /// Creates a stopped driver.
    ///
    /// # Arguments
    ///
    /// * `transport` - Transport to register clients with
    /// * `config` - Client naming, count and session queue settings
    /// * `clock` - Master clock handed to every session
    pub fn new(transport: T, config: DriverConfig, clock: Arc<dyn MasterClock>) -> Self {
        Self {
            config,
            clock,
            transport: Mutex::new(transport),
            inner: Mutex::new(DriverInner {
                state: DriverState::Stopped,
                clients: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> DriverState {
        lock(&self.inner).state
    }

    /// Number of currently registered clients.
    pub fn registered_clients(&self) -> usize {
        lock(&self.inner).clients.len()
    }

    /// Handles of the live sessions, for closing or reading counters.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        lock(&self.inner)
            .clients
            .iter()
            .map(|c| c.session.clone())
            .collect()
    }

    /// Runs `f` with the transport locked.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut lock(&self.transport))
    }

    /// Registers every configured client.
    ///
    /// # Returns
    ///
    /// One receiver per client, in registration order.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidState`] unless the driver is stopped
    /// - [`BridgeError::Registration`] if any client fails; the clients
    ///   registered before it are unregistered again and the driver is left
    ///   stopped with nothing registered
    pub fn start(&self) -> Result<Vec<SessionReceiver>, BridgeError> {
        {
            let mut inner = lock(&self.inner);
            if inner.state != DriverState::Stopped {
                return Err(BridgeError::InvalidState {
                    action: "start",
                    state: inner.state,
                });
            }
            inner.state = DriverState::Starting;
        }

        let mut transport = lock(&self.transport);
        let mut registered = Vec::with_capacity(self.config.ports);
        let mut receivers = Vec::with_capacity(self.config.ports);

        for index in 0..self.config.ports {
            let name = self.config.client_name(index);
            let (session, receiver) = MidiSession::new(
                name.clone(),
                self.config.queue_capacity,
                self.config.late_tolerance,
                Arc::clone(&self.clock),
            );
            let handle = session.handle();

            match transport.register_client(&name, session) {
                Ok(client) => {
                    tracing::info!("Registered MIDI client {}", name);
                    registered.push(RegisteredClient {
                        client,
                        session: handle,
                    });
                    receivers.push(receiver);
                }
                Err(source) => {
                    tracing::error!("Failed to register MIDI client {}: {}", name, source);
                    Self::teardown(&mut transport, registered);
                    drop(transport);
                    lock(&self.inner).state = DriverState::Stopped;
                    return Err(BridgeError::Registration { name, source });
                }
            }
        }
        drop(transport);

        let mut inner = lock(&self.inner);
        inner.clients = registered;
        inner.state = DriverState::Running;
        Ok(receivers)
    }

    /// Unregisters every client.
    ///
    /// Sessions are closed before their clients go away, so messages still
    /// in flight are dropped and counted rather than waited for. Stopping a
    /// stopped driver does nothing.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] if a start or stop is in progress.
    pub fn stop(&self) -> Result<(), BridgeError> {
        let clients = {
            let mut inner = lock(&self.inner);
            match inner.state {
                DriverState::Stopped => return Ok(()),
                DriverState::Running => {}
                state => {
                    return Err(BridgeError::InvalidState {
                        action: "stop",
                        state,
                    })
                }
            }
            inner.state = DriverState::Stopping;
            for client in &inner.clients {
                client.session.close();
            }
            std::mem::take(&mut inner.clients)
        };

        Self::teardown(&mut lock(&self.transport), clients);
        lock(&self.inner).state = DriverState::Stopped;
        Ok(())
    }

    /// Closes sessions and unregisters clients, newest first.
    fn teardown(transport: &mut T, clients: Vec<RegisteredClient<T::Client>>) {
        for RegisteredClient { client, session } in clients.into_iter().rev() {
            session.close();
            if session.dropped() > 0 {
                tracing::debug!(
                    "MIDI client {} dropped {} messages",
                    session.name(),
                    session.dropped()
                );
            }
            tracing::info!("Unregistering MIDI client {}", session.name());
            transport.unregister_client(client);
        }
    }
}

impl<T: Transport> Drop for JackMidiDriver<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("MIDI driver dropped mid-transition: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::session::tests::ManualClock;
    use super::*;

    type Sessions = Arc<Mutex<Vec<MidiSession>>>;

    /// Transport that keeps sessions reachable from the test and can fail on demand.
    #[derive(Default)]
    struct FakeTransport {
        /// Fail the registration with this zero-based attempt number.
        fail_at: Option<usize>,
        attempts: usize,
        live: Vec<String>,
        unregistered: Vec<String>,
        sessions: Sessions,
    }

    impl Transport for FakeTransport {
        type Client = String;

        fn register_client(
            &mut self,
            name: &str,
            session: MidiSession,
        ) -> Result<String, TransportError> {
            let attempt = self.attempts;
            self.attempts += 1;
            if self.fail_at == Some(attempt) {
                return Err(TransportError::new(name, "server refused"));
            }
            self.live.push(name.to_string());
            self.sessions.lock().unwrap().push(session);
            Ok(name.to_string())
        }

        fn unregister_client(&mut self, client: String) {
            self.live.retain(|n| *n != client);
            self.sessions.lock().unwrap().retain(|s| s.name() != client);
            self.unregistered.push(client);
        }
    }

    fn driver(transport: FakeTransport, ports: usize) -> JackMidiDriver<FakeTransport> {
        let config = DriverConfig {
            ports,
            ..DriverConfig::default()
        };
        JackMidiDriver::new(transport, config, ManualClock::at(0))
    }

    #[test]
    fn test_start_registers_every_port() {
        let driver = driver(FakeTransport::default(), 3);

        let receivers = driver.start().unwrap();
        assert_eq!(driver.state(), DriverState::Running);
        assert_eq!(driver.registered_clients(), 3);
        let names: Vec<_> = receivers.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["mt32emu-1", "mt32emu-2", "mt32emu-3"]);
        driver.with_transport(|t| assert_eq!(t.live.len(), 3));
    }

    #[test]
    fn test_single_port_uses_plain_name() {
        let driver = driver(FakeTransport::default(), 1);
        let receivers = driver.start().unwrap();
        assert_eq!(receivers[0].name(), "mt32emu");
        assert!(format!("{:?}", receivers[0]).contains("mt32emu"));
    }

    #[test]
    fn test_partial_failure_rolls_back() {
        let transport = FakeTransport {
            fail_at: Some(1),
            ..Default::default()
        };
        let driver = driver(transport, 3);

        let err = driver.start().unwrap_err();
        assert!(matches!(
            &err,
            BridgeError::Registration { name, .. } if name == "mt32emu-2"
        ));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(driver.registered_clients(), 0);
        driver.with_transport(|t| {
            assert!(t.live.is_empty());
            assert_eq!(t.unregistered, vec!["mt32emu-1"]);
        });

        // Nothing left to tear down
        driver.stop().unwrap();
        driver.with_transport(|t| assert_eq!(t.unregistered.len(), 1));

        // And the driver is usable again
        driver.with_transport(|t| t.fail_at = None);
        assert_eq!(driver.start().unwrap().len(), 3);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let driver = driver(FakeTransport::default(), 2);
        driver.stop().unwrap();

        driver.start().unwrap();
        driver.stop().unwrap();
        driver.stop().unwrap();

        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(driver.registered_clients(), 0);
        driver.with_transport(|t| {
            assert!(t.live.is_empty());
            assert_eq!(t.unregistered, vec!["mt32emu-2", "mt32emu-1"]);
        });
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let driver = driver(FakeTransport::default(), 1);
        driver.start().unwrap();
        assert!(matches!(
            driver.start(),
            Err(BridgeError::InvalidState {
                action: "start",
                state: DriverState::Running
            })
        ));
        assert_eq!(driver.registered_clients(), 1);
    }

    #[test]
    fn test_stop_drops_in_flight_messages() {
        let transport = FakeTransport::default();
        let sessions = Arc::clone(&transport.sessions);
        let driver = driver(transport, 1);
        let mut receivers = driver.start().unwrap();
        let handle = driver.sessions().remove(0);

        // Transport thread keeps its session while the driver stops
        let mut session = sessions.lock().unwrap().remove(0);
        session.play_message(&[0x90, 60, 100]).unwrap();

        driver.stop().unwrap();
        assert_eq!(
            session.play_message(&[0x80, 60, 0]),
            Err(DeliveryError::SessionClosed)
        );
        assert_eq!(handle.delivered(), 1);
        assert_eq!(handle.dropped(), 1);

        // What was queued before the stop can still be drained
        assert_eq!(receivers[0].drain_due(0, |_| {}), 1);
        assert!(!receivers.remove(0).is_open());
    }

    #[test]
    fn test_config_from_section() {
        let section = JackSection {
            client_name: "munt".to_string(),
            ports: 0,
            queue_capacity: 64,
            late_tolerance_ms: 20,
        };
        let config = DriverConfig::from_section(&section);
        assert_eq!(config.ports, 1);
        assert_eq!(config.late_tolerance, Duration::from_millis(20));
        assert_eq!(config.client_name(0), "munt");
    }
}
