//! Cancellation signal abstraction.
//!
//! The engine and the select operator are scheduler-agnostic; they only need
//! an observable "has this been aborted, and if so why" flag with
//! subscribe/unsubscribe semantics. [`CancelSignal`] is that seam —
//! higher-level code (or a host runtime) supplies an implementation;
//! [`Cancellation`] is the batteries-included one used in tests and by
//! callers who don't already have their own cancellation primitive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::CancelReason;

type Callback = Box<dyn FnOnce(CancelReason) + Send>;

/// An observable abort flag with a reason payload, consumed by
/// [`crate::channel::ReadOptions`]/[`crate::channel::WriteOptions`] and the
/// select operator.
pub trait CancelSignal: Send + Sync {
    fn is_aborted(&self) -> bool;
    fn reason(&self) -> Option<CancelReason>;
    /// Registers `cb` to run exactly once, synchronously, the moment the
    /// signal aborts. Returns a guard; dropping it before firing unsubscribes.
    fn subscribe(&self, cb: Callback) -> Unsubscribe;
}

/// Cancels the subscription it was returned from, if it hasn't fired yet.
pub struct Unsubscribe(Box<dyn FnOnce() + Send>);

impl Unsubscribe {
    pub fn unsubscribe(self) {
        (self.0)()
    }
    fn noop() -> Self {
        Self(Box::new(|| {}))
    }
}

enum State {
    Pending(Vec<(u64, Callback)>),
    Aborted(CancelReason),
}

struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// A one-shot, shareable abort controller — the default [`CancelSignal`]
/// implementation. Clone and hand [`Cancellation::signal`] to any number of
/// reads/writes/selects; calling [`Cancellation::cancel`] aborts all of them.
#[derive(Clone)]
pub struct Cancellation(Arc<Inner>);

impl Cancellation {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            state: Mutex::new(State::Pending(Vec::new())),
            next_id: AtomicU64::new(1),
        }))
    }

    /// Returns a [`CancelSignal`] handle that can be passed into read/write/select options.
    pub fn signal(&self) -> Arc<dyn CancelSignal> {
        self.0.clone()
    }

    /// Aborts the signal with `reason`. Idempotent: only the first call has effect.
    pub fn cancel(&self, reason: CancelReason) {
        let callbacks = {
            let mut state = self.0.state.lock().expect("cancellation mutex poisoned");
            match std::mem::replace(&mut *state, State::Aborted(reason.clone())) {
                State::Pending(cbs) => cbs,
                State::Aborted(prev) => {
                    *state = State::Aborted(prev);
                    return;
                }
            }
        };
        for (_, cb) in callbacks {
            cb(reason.clone());
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal for Arc<Inner> {
    fn is_aborted(&self) -> bool {
        matches!(&*self.state.lock().expect("cancellation mutex poisoned"), State::Aborted(_))
    }

    fn reason(&self) -> Option<CancelReason> {
        match &*self.state.lock().expect("cancellation mutex poisoned") {
            State::Aborted(r) => Some(r.clone()),
            State::Pending(_) => None,
        }
    }

    fn subscribe(&self, cb: Callback) -> Unsubscribe {
        let mut state = self.state.lock().expect("cancellation mutex poisoned");
        match &mut *state {
            State::Aborted(reason) => {
                let reason = reason.clone();
                drop(state);
                cb(reason);
                Unsubscribe::noop()
            }
            State::Pending(cbs) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                cbs.push((id, cb));
                drop(state);
                let inner = Arc::clone(self);
                Unsubscribe(Box::new(move || {
                    if let Ok(mut state) = inner.state.lock() {
                        if let State::Pending(cbs) = &mut *state {
                            cbs.retain(|(cid, _)| *cid != id);
                        }
                    }
                }))
            }
        }
    }
}
