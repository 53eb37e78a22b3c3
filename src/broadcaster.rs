//! The [`Broadcaster`], which fans out [`State`] transitions to any number of
//! observer pairs without ever blocking the supervisor that publishes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::ConsumerError;
use crate::state::State;

/// A single-slot mailbox: holds at most one pending value, overwriting
/// whatever was there before. This is the primitive the collapsing rule in
/// `register`/`publish` below is built from — it plays the role a capacity-1
/// Go channel plays in the source, except both ends live behind this one
/// type since Rust's split `Sender`/`Receiver` can't be drained from the
/// producer side the way a bidirectional `chan` can.
struct Slot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Overwrites the pending value, dropping whatever was queued before.
    fn set(&self, v: T) {
        *self.value.lock().unwrap() = Some(v);
        self.notify.notify_waiters();
    }

    /// Drops the pending value, if any, without notifying anyone.
    fn clear(&self) {
        self.value.lock().unwrap().take();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits for a value, returning `None` once the slot is closed and drained.
    async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(v) = self.value.lock().unwrap().take() {
                return Some(v);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }
}

/// The ready half of an observer pair, returned by [`Broadcaster::register`].
pub struct ReadyReceiver(Arc<Slot<()>>);

impl ReadyReceiver {
    /// Waits for the next ready transition. Returns `None` once the
    /// broadcaster has been closed and no ready value remains pending.
    pub async fn recv(&self) -> Option<()> {
        self.0.recv().await
    }
}

/// The unready half of an observer pair, returned by [`Broadcaster::register`].
pub struct UnreadyReceiver(Arc<Slot<ConsumerError>>);

impl UnreadyReceiver {
    /// Waits for the next unready transition. Returns `None` once the
    /// broadcaster has been closed and no unready value remains pending.
    pub async fn recv(&self) -> Option<ConsumerError> {
        self.0.recv().await
    }
}

/// One registered observer's pair of sinks.
struct Observer {
    ready: Arc<Slot<()>>,
    unready: Arc<Slot<ConsumerError>>,
}

/// `state` and `observers` behind a single lock, so `register` (seed from
/// current state, then add to the fan-out list) and `publish` (update state,
/// then fan out) can never interleave. Two separately-locked fields would let
/// a `register` seed from a state that `publish` has already superseded by
/// the time the observer is actually added to the list, stranding it on a
/// stale value with the real transition never delivered.
struct Inner {
    state: State,
    observers: Vec<Observer>,
}

/// Fans out `State` transitions published by the supervisor to any number of
/// registered observers, applying the collapsing rule described in the
/// module docs: a slow observer never blocks the publisher, but sees every
/// Ready/Unready transition at least once.
pub struct Broadcaster {
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

impl Broadcaster {
    /// Creates a broadcaster seeded with the given initial state.
    pub fn new(initial: State) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: initial,
                observers: Vec::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Installs a new observer pair, seeding it with the current state.
    ///
    /// # Panics
    /// Panics with `"ready chan is unbuffered"` / `"unready chan is
    /// unbuffered"` if either capacity is zero, mirroring the source's
    /// programmer-error check on caller-supplied channels.
    pub fn register(
        &self,
        ready_capacity: usize,
        unready_capacity: usize,
    ) -> (ReadyReceiver, UnreadyReceiver) {
        assert!(ready_capacity > 0, "ready chan is unbuffered");
        assert!(unready_capacity > 0, "unready chan is unbuffered");

        let ready = Arc::new(Slot::new());
        let unready = Arc::new(Slot::new());

        // Seeding and pushing happen under one `inner` lock acquisition, so
        // no `publish` can land in between and be missed.
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            State::Ready => ready.set(()),
            State::Unready(e) => unready.set(e.clone()),
        }

        if self.closed.load(Ordering::SeqCst) {
            ready.close();
            unready.close();
        } else {
            inner.observers.push(Observer {
                ready: ready.clone(),
                unready: unready.clone(),
            });
        }

        (ReadyReceiver(ready), UnreadyReceiver(unready))
    }

    /// Publishes a new state to every registered observer.
    ///
    /// Non-blocking: overwrites the pending value on the sink that matches
    /// the new state and drains the opposite sink, so at most one sink per
    /// observer ever carries a pending value.
    pub fn publish(&self, state: State) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.state = state.clone();

        match &state {
            State::Ready => {
                for obs in inner.observers.iter() {
                    obs.unready.clear();
                    obs.ready.set(());
                }
            }
            State::Unready(e) => {
                for obs in inner.observers.iter() {
                    obs.ready.clear();
                    obs.unready.set(e.clone());
                }
            }
        }
    }

    /// Stops publishing and closes every registered sink so observers
    /// waiting on `recv` unblock with `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for obs in self.inner.lock().unwrap().observers.iter() {
            obs.ready.close();
            obs.unready.close();
        }
    }
}
