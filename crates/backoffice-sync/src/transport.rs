//! Event channel seam
//!
//! Connection management lives outside the core. Controllers only emit
//! commands through [`Transport`] and observe [`ConnectionState`] changes.
//! Inbound pushes go through a [`PushHub`]: applied once to the shared
//! stores, then fanned out to every mounted view.

use crate::envelope::{decode_entity_push, EntityPush, Envelope};
use crate::error::TransportError;
use backoffice_model::Entity;
use backoffice_store::SharedStore;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

/// Replay journal length as a multiple of the broadcast capacity
pub const JOURNAL_FACTOR: usize = 8;

/// Outbound side of the event channel
pub trait Transport: Send + Sync {
    /// Queue one command; never waits
    ///
    /// # Errors
    /// `TransportError` when the channel is down or full
    fn emit(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Whether the channel is currently up
    fn is_connected(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn emit(&self, envelope: Envelope) -> Result<(), TransportError> {
        (**self).emit(envelope)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Channel connectivity as seen by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Commands can be sent
    Connected,
    /// Commands fail; in-flight flags are released
    Disconnected,
}

impl ConnectionState {
    /// Whether commands can be sent
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// [`Transport`] over a bounded tokio channel
///
/// The receiving half goes to whatever actually talks to the server: a socket
/// writer in production, a loopback server in tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outbound: mpsc::Sender<Envelope>,
    connection: Arc<watch::Sender<ConnectionState>>,
    capacity: usize,
}

impl ChannelTransport {
    /// Create a connected transport and its outbound receiver
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (connection, _) = watch::channel(ConnectionState::Connected);
        let transport = Self {
            outbound,
            connection: Arc::new(connection),
            capacity: capacity.max(1),
        };
        (transport, rx)
    }

    /// Report a connectivity change from the socket layer
    pub fn set_connected(&self, connected: bool) {
        let state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        let changed = self.connection.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            tracing::info!(?state, "connection state changed");
        }
    }

    /// Observe connectivity changes
    #[must_use]
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }
}

impl Transport for ChannelTransport {
    fn emit(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let event = envelope.event.clone();
        match self.outbound.try_send(envelope) {
            Ok(()) => {
                tracing::debug!(%event, "queued command");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%event, capacity = self.capacity, "outbound queue full");
                Err(TransportError::Backpressure(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected()
    }
}

/// Consumer of every inbound push, applied once and in arrival order
///
/// Sinks run inside [`PushHub::publish`] before any view sees the push. They
/// must not publish back into the hub.
pub trait PushSink: Send + Sync {
    /// Apply one push
    fn accept(&self, envelope: &Envelope);
}

impl<E: Entity> PushSink for SharedStore<E> {
    fn accept(&self, envelope: &Envelope) {
        match decode_entity_push::<E>(envelope) {
            Ok(Some(EntityPush::Store(push))) => {
                let change = self.apply(push);
                tracing::debug!(namespace = E::NAMESPACE, ?change, "store applied push");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "store skipped malformed push"),
        }
    }
}

/// One delivery to a mounted view
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Next push in arrival order
    Push(Envelope),
    /// This many pushes were lost; the view should resynchronize
    Gap(u64),
}

struct HubState {
    seq: u64,
    journal: VecDeque<(u64, Envelope)>,
    journal_len: usize,
    sinks: Vec<Arc<dyn PushSink>>,
}

/// Fan-out of inbound pushes to mounted views
///
/// Every push is applied to the attached sinks (shared stores, the session)
/// exactly once, then broadcast. Views only correlate their own flags.
/// A view that falls behind the broadcast buffer replays what it missed from
/// a bounded journal; beyond that it gets a [`Delivery::Gap`].
#[derive(Clone)]
pub struct PushHub {
    sender: broadcast::Sender<Envelope>,
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for PushHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PushHub")
            .field("seq", &state.seq)
            .field("journal", &state.journal.len())
            .field("sinks", &state.sinks.len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl PushHub {
    /// Hub retaining up to `capacity` undelivered pushes per receiver
    ///
    /// The replay journal keeps `JOURNAL_FACTOR` times as many.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_journal(capacity, capacity.max(1) * JOURNAL_FACTOR)
    }

    /// Hub with an explicit replay journal length
    #[must_use]
    pub fn with_journal(capacity: usize, journal_len: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            state: Arc::new(Mutex::new(HubState {
                seq: 0,
                journal: VecDeque::with_capacity(journal_len),
                journal_len,
                sinks: Vec::new(),
            })),
        }
    }

    /// Register a sink for every later push
    pub fn attach(&self, sink: impl PushSink + 'static) {
        self.state.lock().sinks.push(Arc::new(sink));
    }

    /// Apply a push to the sinks, then deliver it to every mounted view
    ///
    /// Returns the receiver count.
    pub fn publish(&self, envelope: Envelope) -> usize {
        let mut state = self.state.lock();
        tracing::debug!(event = %envelope.event, request_id = ?envelope.request_id, "push");
        for sink in &state.sinks {
            sink.accept(&envelope);
        }

        state.seq += 1;
        let seq = state.seq;
        if state.journal_len > 0 {
            if state.journal.len() == state.journal_len {
                state.journal.pop_front();
            }
            state.journal.push_back((seq, envelope.clone()));
        }
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Receiver for a newly mounted view
    #[must_use]
    pub fn subscribe(&self) -> PushSubscription {
        let state = self.state.lock();
        PushSubscription {
            rx: self.sender.subscribe(),
            hub: self.clone(),
            cursor: state.seq,
            replay: VecDeque::new(),
        }
    }

    /// Number of mounted receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Journaled pushes `after + 1 ..= after + count`, if all are still held
    fn replay(&self, after: u64, count: u64) -> Option<VecDeque<Envelope>> {
        let state = self.state.lock();
        let missed: VecDeque<Envelope> = state
            .journal
            .iter()
            .filter(|(seq, _)| *seq > after && *seq <= after + count)
            .map(|(_, envelope)| envelope.clone())
            .collect();
        (missed.len() as u64 == count).then_some(missed)
    }
}

/// A mounted view's position in the push stream
pub struct PushSubscription {
    rx: broadcast::Receiver<Envelope>,
    hub: PushHub,
    cursor: u64,
    replay: VecDeque<Envelope>,
}

impl std::fmt::Debug for PushSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSubscription")
            .field("cursor", &self.cursor)
            .field("replay", &self.replay.len())
            .finish_non_exhaustive()
    }
}

impl PushSubscription {
    /// Next delivery; `None` once the hub is gone
    ///
    /// Cancel-safe: nothing is consumed unless a delivery is returned.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(envelope) = self.replay.pop_front() {
                self.cursor += 1;
                return Some(Delivery::Push(envelope));
            }
            match self.rx.recv().await {
                Ok(envelope) => {
                    self.cursor += 1;
                    return Some(Delivery::Push(envelope));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    if let Some(missed) = self.hub.replay(self.cursor, skipped) {
                        tracing::debug!(skipped, "replaying missed pushes");
                        self.replay = missed;
                        continue;
                    }
                    tracing::warn!(skipped, "missed pushes no longer journaled");
                    self.cursor += skipped;
                    return Some(Delivery::Gap(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
