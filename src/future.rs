//! Bridges the engine's callback-based park/fire protocol to `std::future::Future`.
//!
//! This is the one spot where the "host scheduler" the core is agnostic
//! about gets a concrete implementation: a [`Waker`] registered here plays
//! the role the spec describes generically as "translate to the host's
//! native suspension primitive". Firing may happen synchronously (the fast
//! path, still inside the call that created the future) or from another
//! thread later — both are handled by the same `Mutex`-guarded state.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

enum State<O> {
    Pending(Option<Waker>),
    Ready(O),
    /// The value was already taken by a previous poll.
    Taken,
}

pub(crate) struct Completion<O> {
    state: Mutex<State<O>>,
}

impl<O> Completion<O> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending(None)),
        })
    }

    /// Fires the completion with `out`. A no-op if already completed —
    /// callers that need "first fire wins" semantics must arrange that
    /// themselves (see the select operator), since a `Completion` on its
    /// own just remembers the first value it's given.
    pub(crate) fn complete(&self, out: O) {
        let waker = {
            let mut state = self.state.lock().expect("completion mutex poisoned");
            match &*state {
                State::Pending(_) => {
                    let prev = std::mem::replace(&mut *state, State::Ready(out));
                    match prev {
                        State::Pending(w) => w,
                        _ => unreachable!(),
                    }
                }
                _ => None,
            }
        };
        if let Some(w) = waker {
            w.wake();
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(&*self.state.lock().expect("completion mutex poisoned"), State::Ready(_))
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<O> {
        let mut state = self.state.lock().expect("completion mutex poisoned");
        match &mut *state {
            State::Ready(_) => {
                let prev = std::mem::replace(&mut *state, State::Taken);
                match prev {
                    State::Ready(out) => Poll::Ready(out),
                    _ => unreachable!(),
                }
            }
            State::Pending(waker) => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
            State::Taken => panic!("polled a CompletionFuture after it already yielded its value"),
        }
    }
}

/// A future resolving to whatever a [`Completion`] is eventually fired with.
pub(crate) struct CompletionFuture<O>(pub(crate) Arc<Completion<O>>);

impl<O> Future for CompletionFuture<O> {
    type Output = O;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<O> {
        self.0.poll_take(cx)
    }
}
