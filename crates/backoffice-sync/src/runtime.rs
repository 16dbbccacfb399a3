//! View runtime
//!
//! One cooperative tokio task per mounted view. The loop waits on four
//! sources and handles one event at a time, in arrival order:
//! - server pushes from the [`PushHub`], replayed if the view fell behind
//! - connectivity changes
//! - user intents
//! - the earliest pending deadline
//!
//! The loop ends when the view reports itself finished or its intent channel
//! closes (unmount). Pushes arriving afterwards are never delivered.

use crate::error::TransportError;
use crate::transport::{ConnectionState, Delivery, PushHub, PushSubscription};
use crate::view::{View, ViewEffect};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

const INTENT_CAPACITY: usize = 16;

/// UI-side handle of a running view
#[derive(Debug)]
pub struct ViewHandle<I> {
    intents: mpsc::Sender<I>,
    effects: mpsc::UnboundedReceiver<ViewEffect>,
}

impl<I: Send + 'static> ViewHandle<I> {
    /// Forward a user intent
    ///
    /// # Errors
    /// `TransportError::Closed` once the view has unmounted
    pub async fn send(&self, intent: I) -> Result<(), TransportError> {
        self.intents
            .send(intent)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next effect, waiting if none is queued
    ///
    /// `None` once the view has unmounted and every effect was read.
    pub async fn next_effect(&mut self) -> Option<ViewEffect> {
        self.effects.recv().await
    }

    /// Next effect if one is already queued
    pub fn try_effect(&mut self) -> Option<ViewEffect> {
        self.effects.try_recv().ok()
    }

    /// Read effects until one satisfies `pred`
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&ViewEffect) -> bool) -> Option<ViewEffect> {
        while let Some(effect) = self.effects.recv().await {
            if pred(&effect) {
                return Some(effect);
            }
        }
        None
    }

    /// Drop the intent sender, asking the view to unmount
    pub fn close(self) -> mpsc::UnboundedReceiver<ViewEffect> {
        self.effects
    }
}

/// Event loop of one view
#[derive(Debug)]
pub struct ViewRuntime<V: View> {
    view: V,
    pushes: PushSubscription,
    intents: mpsc::Receiver<V::Intent>,
    connection: watch::Receiver<ConnectionState>,
    effects: mpsc::UnboundedSender<ViewEffect>,
}

impl<V: View> ViewRuntime<V> {
    /// Runtime and the UI handle that drives it
    pub fn new(
        view: V,
        pushes: PushSubscription,
        connection: watch::Receiver<ConnectionState>,
    ) -> (Self, ViewHandle<V::Intent>) {
        let (intent_tx, intents) = mpsc::channel(INTENT_CAPACITY);
        let (effects, effect_rx) = mpsc::unbounded_channel();
        let runtime = Self {
            view,
            pushes,
            intents,
            connection,
            effects,
        };
        let handle = ViewHandle {
            intents: intent_tx,
            effects: effect_rx,
        };
        (runtime, handle)
    }

    /// Run until the view finishes or unmounts; returns the view
    pub async fn run(mut self) -> V {
        let mut connection_open = true;
        let mounted = self.view.on_mount(Instant::now());
        self.publish(mounted);

        while !self.view.is_finished() {
            let deadline = self.view.next_deadline();
            let effects = tokio::select! {
                biased;

                push = self.pushes.recv() => match push {
                    Some(Delivery::Push(envelope)) => self.view.on_push(&envelope, Instant::now()),
                    Some(Delivery::Gap(missed)) => {
                        tracing::warn!(missed, "view lost pushes, resynchronizing");
                        self.view.on_gap(Instant::now())
                    }
                    None => {
                        tracing::info!("push channel closed, unmounting view");
                        break;
                    }
                },

                changed = self.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let state = *self.connection.borrow_and_update();
                        self.view.on_connection(state, Instant::now())
                    }
                    Err(_) => {
                        connection_open = false;
                        Vec::new()
                    }
                },

                intent = self.intents.recv() => match intent {
                    Some(intent) => self.view.on_intent(intent).await,
                    None => {
                        tracing::debug!("intent channel closed, unmounting view");
                        break;
                    }
                },

                () = sleep_until_deadline(deadline) => self.view.on_deadline(Instant::now()),
            };
            self.publish(effects);
        }

        self.view
    }

    fn publish(&self, effects: Vec<ViewEffect>) {
        for effect in effects {
            if self.effects.send(effect).is_err() {
                // UI stopped listening; keep processing so flags still resolve
                break;
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Mount a view on its own task
pub fn spawn_view<V>(
    view: V,
    hub: &PushHub,
    connection: watch::Receiver<ConnectionState>,
) -> (ViewHandle<V::Intent>, JoinHandle<V>)
where
    V: View + 'static,
{
    let (runtime, handle) = ViewRuntime::new(view, hub.subscribe(), connection);
    (handle, tokio::spawn(runtime.run()))
}
