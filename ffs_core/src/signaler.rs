//! One-to-many edge-triggered notifications.
//!
//! A [`Signaler`] tells its listeners that "something may have changed,
//! look again". Each listener buffers at most one pending event; a
//! signal that arrives while one is already pending is dropped. An
//! event therefore means "at least one change since you last looked",
//! never "exactly this change", and events carry no data.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};

/// Receiving side of a subscription, created by [`Signaler::listen`].
///
/// The listener is closed once it is unregistered or the signaler is
/// closed; any event still buffered at that point is delivered first.
#[derive(Debug)]
pub struct Listener {
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event. Returns `None` once the listener is closed.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Takes a pending event without waiting.
    pub fn try_recv(&mut self) -> Result<(), TryRecvError> {
        self.rx.try_recv()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    listeners: Vec<(u64, mpsc::Sender<()>)>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct Signaler {
    state: Mutex<State>,
}

impl Signaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener.
    ///
    /// Listening on a closed signaler returns an already-closed listener.
    pub fn listen(&self) -> Listener {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        if !state.closed {
            state.listeners.push((id, tx));
        }
        Listener { id, rx }
    }

    /// Removes `listener` and closes it.
    pub fn unregister(&self, listener: &Listener) {
        let mut state = self.lock();
        if let Some(idx) = state
            .listeners
            .iter()
            .position(|(id, _)| *id == listener.id)
        {
            // Dropping the removed sender is what closes the listener.
            let (_id, tx) = state.listeners.swap_remove(idx);
            drop(tx);
        }
    }

    /// Notifies every registered listener without blocking.
    pub fn signal(&self) {
        let mut state = self.lock();
        state.listeners.retain(|(id, tx)| match tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                warn!("listener {id} already has a pending signal, dropping this one");
                true
            }
            Err(TrySendError::Closed(())) => {
                debug!("listener {id} was dropped, unregistering it");
                false
            }
        });
    }

    /// Closes every listener. Later signals are no-ops.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.listeners.clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
