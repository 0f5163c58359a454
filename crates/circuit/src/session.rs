//! Connection lifecycle, rate-limited sending, and request/response
//! correlation for one Circuit Tracks.
//!
//! A [`TransportSession`] owns at most one open port. Every SysEx send passes
//! through a single gate that keeps consecutive sends at least
//! `min_send_interval` apart. Requests awaiting a reply are keyed by the reply's
//! command byte; inbound frames that match no pending request are published as
//! [`SessionEvent::FrameReceived`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use circuit_core::sysex::{self, SYSEX_END, SYSEX_START};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::midi::{self, InboundHandler, MidiBackend, MidiConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Started,
    Continued,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlChange {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

/// Everything a session publishes to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    Connected(String),
    Disconnected,
    PortsChanged(Vec<String>),
    /// A SysEx frame no pending request claimed
    FrameReceived(Vec<u8>),
    CcReceived(ControlChange),
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    TransportStateChanged(PlaybackState),
}

/// Typed view over the session's event stream.
///
/// Receiving yields `None` once the session is closed or after
/// [`unsubscribe`](Subscription::unsubscribe).
pub struct Subscription<T> {
    rx: Option<broadcast::Receiver<SessionEvent>>,
    select: fn(SessionEvent) -> Option<T>,
}

impl<T> Subscription<T> {
    fn new(rx: Option<broadcast::Receiver<SessionEvent>>, select: fn(SessionEvent) -> Option<T>) -> Self {
        Self { rx, select }
    }

    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => {
                    if let Some(item) = (self.select)(event) {
                        return Some(item);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next already-delivered item, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(item) = (self.select)(event) {
                        return Some(item);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Detach from the session. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}

struct PendingRequest {
    id: u64,
    responder: oneshot::Sender<Result<Vec<u8>, TransportError>>,
    deadline: Instant,
}

struct SessionState {
    connection: ConnectionState,
    active_port: Option<String>,
    /// Port to reconnect to when it reappears
    remembered_port: Option<String>,
}

#[derive(Default)]
struct Timers {
    debounce: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

struct SessionInner {
    backend: Arc<dyn MidiBackend>,
    config: SessionConfig,
    runtime: Option<Handle>,
    state: Mutex<SessionState>,
    connection: Mutex<Option<Box<dyn MidiConnection>>>,
    pending: Mutex<BTreeMap<u8, PendingRequest>>,
    /// Dispatch instant of the last SysEx send
    send_gate: tokio::sync::Mutex<Option<Instant>>,
    /// Bumped on every connect and teardown; inbound callbacks carry the value
    /// they were created with.
    generation: AtomicU64,
    next_request_id: AtomicU64,
    events: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    timers: Mutex<Timers>,
}

/// Handle to one device session. Clones share the same session.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

impl TransportSession {
    /// Create a session over `backend`.
    ///
    /// When called inside a tokio runtime, a port watcher is started that polls
    /// the port list every `port_poll_interval`.
    pub fn open(backend: Arc<dyn MidiBackend>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!("No tokio runtime; hot-plug handling disabled");
        }
        let inner = Arc::new(SessionInner {
            backend,
            config,
            runtime,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                active_port: None,
                remembered_port: None,
            }),
            connection: Mutex::new(None),
            pending: Mutex::new(BTreeMap::new()),
            send_gate: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            next_request_id: AtomicU64::new(1),
            events: Mutex::new(Some(events)),
            timers: Mutex::new(Timers::default()),
        });
        inner.start_watcher();
        Self { inner }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn active_port(&self) -> Option<String> {
        self.inner.state.lock().active_port.clone()
    }

    pub fn remembered_port(&self) -> Option<String> {
        self.inner.state.lock().remembered_port.clone()
    }

    /// Bidirectional ports, best device match first.
    pub fn ports(&self) -> Vec<String> {
        midi::rank_ports(
            midi::bidirectional_ports(&*self.inner.backend),
            &self.inner.config.port_patterns,
        )
    }

    pub fn find_device_port(&self) -> Option<String> {
        midi::find_device_port(&*self.inner.backend, &self.inner.config.port_patterns)
    }

    /// Connect to `port_name`, closing any previous connection first.
    pub fn connect(&self, port_name: &str) -> Result<(), TransportError> {
        self.inner.connect(port_name)
    }

    /// Connect to the best matching device port.
    pub fn connect_device(&self) -> Result<String, TransportError> {
        let port = self.find_device_port().ok_or_else(|| TransportError::PortNotFound {
            port: self.inner.config.port_patterns.join("|"),
        })?;
        self.inner.connect(&port)?;
        Ok(port)
    }

    /// Close the connection. The port is remembered and reconnected when it
    /// reappears.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    /// Disconnect and stop reconnecting to this device.
    pub fn forget_device(&self) {
        self.inner.state.lock().remembered_port = None;
        self.inner.teardown();
    }

    /// End the session: forget the device, stop timers, and close every
    /// subscription.
    pub fn close(&self) {
        self.forget_device();
        let timers = std::mem::take(&mut *self.inner.timers.lock());
        for handle in [timers.debounce, timers.watcher].into_iter().flatten() {
            handle.abort();
        }
        self.inner.events.lock().take();
        tracing::debug!("Session closed");
    }

    /// (Re)start the hot-plug debounce timer.
    pub fn notify_ports_changed(&self) {
        self.inner.notify_ports_changed();
    }

    /// Re-read the port list now, handling vanished and reappeared ports.
    pub fn handle_ports_changed(&self) {
        self.inner.handle_ports_changed();
    }

    /// Send one SysEx message, waiting out the minimum send interval.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.send(bytes).await
    }

    /// Send `bytes` and wait for a frame whose command byte is
    /// `expected_command`.
    ///
    /// The deadline is fixed before sending, so time spent waiting for the send
    /// gate counts against `timeout`. A newer request for the same command
    /// replaces this one, which then fails with [`TransportError::Superseded`].
    pub async fn send_and_await(
        &self,
        bytes: &[u8],
        expected_command: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.inner.send_and_await(bytes, expected_command, timeout).await
    }

    /// [`send_and_await`](Self::send_and_await) with the configured response timeout.
    pub async fn request(&self, bytes: &[u8], expected_command: u8) -> Result<Vec<u8>, TransportError> {
        let timeout = self.inner.config.response_timeout();
        self.inner.send_and_await(bytes, expected_command, timeout).await
    }

    /// Send a control change. Not rate limited.
    pub fn send_cc(&self, channel: u8, controller: u8, value: u8) -> Result<(), TransportError> {
        let msg = [0xB0 | (channel & 0x0F), controller.min(0x7F), value.min(0x7F)];
        self.inner.transmit(&msg)
    }

    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        Subscription::new(self.inner.receiver(), Some)
    }

    pub fn subscribe_frames(&self) -> Subscription<Vec<u8>> {
        Subscription::new(self.inner.receiver(), |event| match event {
            SessionEvent::FrameReceived(bytes) => Some(bytes),
            _ => None,
        })
    }

    pub fn subscribe_cc(&self) -> Subscription<ControlChange> {
        Subscription::new(self.inner.receiver(), |event| match event {
            SessionEvent::CcReceived(cc) => Some(cc),
            _ => None,
        })
    }

    /// Connected, Disconnected and PortsChanged events only.
    pub fn subscribe_connection(&self) -> Subscription<SessionEvent> {
        Subscription::new(self.inner.receiver(), |event| match event {
            SessionEvent::Connected(_) | SessionEvent::Disconnected | SessionEvent::PortsChanged(_) => {
                Some(event)
            }
            _ => None,
        })
    }
}

impl SessionInner {
    fn receiver(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.events.lock().as_ref().map(|tx| tx.subscribe())
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            // No subscribers is not an error
            let _ = tx.send(event);
        }
    }

    fn spawn<F>(&self, future: F) -> Option<JoinHandle<()>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.as_ref().map(|rt| rt.spawn(future))
    }

    fn connect(self: &Arc<Self>, port_name: &str) -> Result<(), TransportError> {
        self.teardown();
        self.state.lock().connection = ConnectionState::Connecting;
        tracing::debug!("Connecting to {}", port_name);

        let ports = midi::bidirectional_ports(&*self.backend);
        if !ports.iter().any(|p| p == port_name) {
            self.state.lock().connection = ConnectionState::Disconnected;
            return Err(TransportError::PortNotFound {
                port: port_name.to_string(),
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<SessionInner> = Arc::downgrade(self);
        let handler: InboundHandler = Box::new(move |bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch_inbound(generation, bytes);
            }
        });

        let connection = match self.backend.open(port_name, handler) {
            Ok(connection) => connection,
            Err(err) => {
                self.state.lock().connection = ConnectionState::Disconnected;
                tracing::warn!("Failed to open {}: {}", port_name, err);
                return Err(err);
            }
        };

        *self.connection.lock() = Some(connection);
        {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Connected;
            state.active_port = Some(port_name.to_string());
            state.remembered_port = Some(port_name.to_string());
        }
        tracing::info!("Connected to {}", port_name);
        self.emit(SessionEvent::Connected(port_name.to_string()));
        Ok(())
    }

    /// Close the connection and fail every pending request. Returns whether a
    /// connection was open.
    fn teardown(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let connection = self.connection.lock().take();
        let was_connected = {
            let mut state = self.state.lock();
            let was = state.connection != ConnectionState::Disconnected;
            state.connection = ConnectionState::Disconnected;
            state.active_port = None;
            was
        };
        drop(connection);

        let pending = std::mem::take(&mut *self.pending.lock());
        for (_, request) in pending {
            let _ = request.responder.send(Err(TransportError::Disconnected));
        }

        if was_connected {
            tracing::info!("Disconnected");
            self.emit(SessionEvent::Disconnected);
        }
        was_connected
    }

    fn start_watcher(self: &Arc<Self>) {
        let Some(interval) = self.config.port_poll_interval() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let mut last = midi::bidirectional_ports(&*self.backend);
        let handle = self.spawn(async move {
            loop {
                sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let ports = midi::bidirectional_ports(&*inner.backend);
                if ports != last {
                    last = ports;
                    inner.notify_ports_changed();
                }
            }
        });
        self.timers.lock().watcher = handle;
    }

    fn notify_ports_changed(self: &Arc<Self>) {
        if self.runtime.is_none() {
            self.handle_ports_changed();
            return;
        }
        let weak = Arc::downgrade(self);
        let delay = self.config.hotplug_debounce();
        let mut timers = self.timers.lock();
        if let Some(previous) = timers.debounce.take() {
            previous.abort();
        }
        timers.debounce = self.spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.handle_ports_changed();
            }
        });
    }

    fn handle_ports_changed(self: &Arc<Self>) {
        let ports = midi::bidirectional_ports(&*self.backend);
        tracing::debug!(?ports, "Port list changed");
        self.emit(SessionEvent::PortsChanged(ports.clone()));

        let (active, remembered) = {
            let state = self.state.lock();
            (state.active_port.clone(), state.remembered_port.clone())
        };

        if let Some(active) = &active {
            if !ports.contains(active) {
                tracing::warn!("Port {} vanished", active);
                self.teardown();
            }
        }

        if self.state.lock().connection != ConnectionState::Disconnected {
            return;
        }
        if let Some(port) = remembered {
            if ports.contains(&port) {
                let inner = Arc::clone(self);
                self.spawn(async move {
                    if let Err(err) = inner.connect(&port) {
                        tracing::warn!("Reconnect to {} failed: {}", port, err);
                    }
                });
            }
        }
    }

    fn transmit(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut connection = self.connection.lock();
        let connection = connection.as_mut().ok_or(TransportError::NotConnected)?;
        connection.send(bytes)
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.state.lock().connection != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let mut last_sent = self.send_gate.lock().await;
        if let Some(last) = *last_sent {
            sleep_until(last + self.config.min_send_interval()).await;
        }
        *last_sent = Some(Instant::now());
        self.transmit(bytes)?;
        tracing::trace!(len = bytes.len(), "Sent SysEx");
        Ok(())
    }

    async fn send_and_await(
        &self,
        bytes: &[u8],
        expected_command: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if self.state.lock().connection != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let (responder, reply) = oneshot::channel();
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let superseded = self.pending.lock().insert(
            expected_command,
            PendingRequest {
                id,
                responder,
                deadline,
            },
        );
        if let Some(previous) = superseded {
            tracing::debug!("Request for 0x{:02X} superseded", expected_command);
            let _ = previous.responder.send(Err(TransportError::Superseded {
                command: expected_command,
            }));
        }

        let mut reply = reply;
        if let Err(err) = self.send(bytes).await {
            self.remove_pending(expected_command, id);
            // A teardown during the gate wait has already answered this request
            if let Ok(result) = reply.try_recv() {
                return result;
            }
            return Err(err);
        }

        match timeout_at(deadline, reply).await {
            Ok(Ok(result)) => result,
            // Responder dropped without an answer
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                self.remove_pending(expected_command, id);
                tracing::debug!("Timed out waiting for 0x{:02X}", expected_command);
                Err(TransportError::Timeout {
                    command: expected_command,
                })
            }
        }
    }

    fn remove_pending(&self, command: u8, id: u64) {
        let mut pending = self.pending.lock();
        if pending.get(&command).is_some_and(|request| request.id == id) {
            pending.remove(&command);
        }
    }

    fn dispatch_inbound(&self, generation: u64, bytes: &[u8]) {
        if generation != self.generation.load(Ordering::SeqCst) {
            tracing::trace!("Dropping message from a closed connection");
            return;
        }
        let Some(&status) = bytes.first() else {
            return;
        };
        match status {
            0xF8 => {}
            SYSEX_START => self.dispatch_sysex(bytes),
            0xFA => self.emit(SessionEvent::TransportStateChanged(PlaybackState::Started)),
            0xFB => self.emit(SessionEvent::TransportStateChanged(PlaybackState::Continued)),
            0xFC => self.emit(SessionEvent::TransportStateChanged(PlaybackState::Stopped)),
            status if status < 0xF0 => self.dispatch_channel(status, bytes),
            _ => {}
        }
    }

    fn dispatch_channel(&self, status: u8, bytes: &[u8]) {
        let channel = status & 0x0F;
        let data1 = bytes.get(1).copied().unwrap_or(0);
        let data2 = bytes.get(2).copied().unwrap_or(0);
        let event = match status & 0xF0 {
            0x90 if data2 > 0 => SessionEvent::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            },
            0x80 | 0x90 => SessionEvent::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            },
            0xB0 => SessionEvent::CcReceived(ControlChange {
                channel,
                controller: data1,
                value: data2,
            }),
            _ => return,
        };
        self.emit(event);
    }

    fn dispatch_sysex(&self, bytes: &[u8]) {
        if bytes.last() != Some(&SYSEX_END) {
            tracing::trace!(len = bytes.len(), "Dropping unterminated SysEx");
            return;
        }
        if sysex::is_device_frame(bytes) {
            if let Some(command) = sysex::command_byte(bytes) {
                let request = self.pending.lock().remove(&command);
                if let Some(request) = request {
                    if Instant::now() > request.deadline {
                        tracing::trace!("Late reply 0x{:02X}", command);
                    }
                    // A waiter that already gave up gets the frame published instead
                    if request.responder.send(Ok(bytes.to_vec())).is_ok() {
                        return;
                    }
                }
            }
        }
        self.emit(SessionEvent::FrameReceived(bytes.to_vec()));
    }
}
