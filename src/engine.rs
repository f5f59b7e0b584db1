//! The rendezvous engine ("RW"): the synchronous state machine mediating a
//! bounded FIFO buffer, a pool of parked readers and a pool of parked
//! writers for one channel.
//!
//! Every method below runs under a single mutex acquisition — the "check
//! then act" sequences the spec calls out (e.g. `try_read` observing
//! `NotReady` before the caller parks) are each one critical section. The
//! locked helpers (`try_read_locked`/`try_write_locked`) never fire a
//! waiter's callback themselves; they only *remove* the chosen waiter from
//! its pool and hand it back. Every public method below drops the lock
//! before firing whatever waiter(s) it collected, so a callback can safely
//! re-enter the engine (e.g. to park again) without deadlocking on a
//! non-reentrant `Mutex`.

use std::sync::{Mutex, MutexGuard};
use std::task::Waker;

use crate::error::ChannelError;
use crate::pool::{ReadOutcome, ReadWaiter, ReaderPool, WriteWaiter, WriterPool};
use crate::ring::RingBuffer;
use crate::waiter::WaiterId;

/// A waiter that was removed from its pool while the engine's lock was held,
/// to be fired once the lock is released.
enum PendingFire<T> {
    Read(ReadWaiter<T>, ReadOutcome<T>),
    Write(WriteWaiter<T>, Result<(), ChannelError>),
}

impl<T> PendingFire<T> {
    fn fire(self) {
        match self {
            PendingFire::Read(w, out) => w.fire(out),
            PendingFire::Write(w, res) => w.fire(res),
        }
    }
}

fn fire_all<T>(pending: Vec<PendingFire<T>>) {
    for p in pending {
        p.fire();
    }
}

/// Outcome of a non-blocking read attempt.
pub(crate) enum TryRead<T> {
    Value(T),
    EndOfStream,
    NotReady,
}

/// Outcome of a non-blocking write attempt. `Full`/`Closed` hand the value
/// back so the caller can park it without needing `T: Clone`.
pub(crate) enum TryWrite<T> {
    Buffered,
    HandedOff,
    Full(T),
    Closed(T),
}

/// Outcome of a combined check-then-park read attempt (one critical section).
pub(crate) enum ReadAttempt<T> {
    Value(T),
    EndOfStream,
    Parked(WaiterId),
}

/// Outcome of a combined check-then-park write attempt (one critical section).
pub(crate) enum WriteAttempt {
    Buffered,
    HandedOff,
    Closed,
    Parked(WaiterId),
}

struct Inner<T> {
    buffer: Option<RingBuffer<T>>,
    readers: ReaderPool<T>,
    writers: WriterPool<T>,
    closed: bool,
    close_wakers: Vec<Waker>,
}

pub(crate) struct Engine<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Engine<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: (capacity > 0).then(|| RingBuffer::new(capacity)),
                readers: ReaderPool::default(),
                writers: WriterPool::default(),
                closed: false,
                close_wakers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().expect("engine mutex poisoned")
    }

    pub(crate) fn capacity(&self) -> usize {
        self.lock().buffer.as_ref().map_or(0, RingBuffer::capacity)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().buffer.as_ref().map_or(0, RingBuffer::len)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// §4.D `try_read`, operating on an already-locked state. Never fires a
    /// callback itself; a forwarded writer (step 1's vacated-slot reuse) is
    /// handed back in `pending` for the caller to fire after unlocking.
    fn try_read_locked(state: &mut Inner<T>, pending: &mut Vec<PendingFire<T>>) -> TryRead<T> {
        if let Some(buffer) = state.buffer.as_mut() {
            if !buffer.is_empty() {
                let v = buffer.pop().expect("checked non-empty");
                // A parked writer can only exist if the buffer was full; now
                // that we've freed a slot, hand its value off and buffer it,
                // preserving the writer-pool-non-empty invariant.
                if !state.writers.is_empty() {
                    let mut waiter = state.writers.take();
                    let forwarded = waiter.take_value();
                    state
                        .buffer
                        .as_mut()
                        .expect("buffer exists")
                        .push(forwarded)
                        .ok()
                        .expect("slot was just vacated");
                    pending.push(PendingFire::Write(waiter, Ok(())));
                }
                return TryRead::Value(v);
            }
        }

        if state.closed {
            return TryRead::EndOfStream;
        }

        if !state.writers.is_empty() {
            let mut waiter = state.writers.take();
            let v = waiter.take_value();
            pending.push(PendingFire::Write(waiter, Ok(())));
            return TryRead::Value(v);
        }

        TryRead::NotReady
    }

    /// §4.D `try_write`, operating on an already-locked state. A handoff to a
    /// parked reader is handed back in `pending` for the caller to fire after
    /// unlocking.
    fn try_write_locked(state: &mut Inner<T>, v: T, pending: &mut Vec<PendingFire<T>>) -> TryWrite<T> {
        if state.closed {
            return TryWrite::Closed(v);
        }

        if !state.readers.is_empty() {
            let waiter = state.readers.take();
            pending.push(PendingFire::Read(waiter, ReadOutcome::Value(v)));
            return TryWrite::HandedOff;
        }

        if let Some(buffer) = state.buffer.as_mut() {
            return match buffer.push(v) {
                Ok(()) => TryWrite::Buffered,
                Err(v) => TryWrite::Full(v),
            };
        }

        TryWrite::Full(v)
    }

    /// §4.D `try_read`.
    pub(crate) fn try_read(&self) -> TryRead<T> {
        let mut pending = Vec::new();
        let result = Self::try_read_locked(&mut self.lock(), &mut pending);
        fire_all(pending);
        result
    }

    /// §4.D `try_write`.
    pub(crate) fn try_write(&self, v: T) -> TryWrite<T> {
        let mut pending = Vec::new();
        let result = Self::try_write_locked(&mut self.lock(), v, &mut pending);
        fire_all(pending);
        result
    }

    /// Checks and, only if not immediately satisfiable, parks — all inside
    /// one critical section, so nothing can complete in the gap between the
    /// check and the park (the race the spec's caller-policy note warns
    /// about when `try_read`/`park_read` are called as two separate steps).
    /// Any waiter dislodged by the synchronous check fires only after the
    /// lock is released.
    pub(crate) fn try_read_or_park(
        &self,
        fire: impl FnOnce(ReadOutcome<T>) + Send + 'static,
    ) -> ReadAttempt<T> {
        let mut pending = Vec::new();
        let result = {
            let mut state = self.lock();
            match Self::try_read_locked(&mut state, &mut pending) {
                TryRead::Value(v) => ReadAttempt::Value(v),
                TryRead::EndOfStream => ReadAttempt::EndOfStream,
                TryRead::NotReady => ReadAttempt::Parked(state.readers.connect(fire)),
            }
        };
        fire_all(pending);
        result
    }

    /// Write counterpart of [`Engine::try_read_or_park`].
    pub(crate) fn try_write_or_park(
        &self,
        v: T,
        fire: impl FnOnce(Result<(), ChannelError>) + Send + 'static,
    ) -> WriteAttempt {
        let mut pending = Vec::new();
        let result = {
            let mut state = self.lock();
            match Self::try_write_locked(&mut state, v, &mut pending) {
                TryWrite::Buffered => WriteAttempt::Buffered,
                TryWrite::HandedOff => WriteAttempt::HandedOff,
                TryWrite::Closed(_) => WriteAttempt::Closed,
                TryWrite::Full(v) => WriteAttempt::Parked(state.writers.connect(v, fire)),
            }
        };
        fire_all(pending);
        result
    }

    /// Unconditionally registers a parked reader, without rechecking
    /// `try_read` first. Used by callers that already hold proof the
    /// channel wasn't immediately ready (e.g. an earlier synchronous pass).
    pub(crate) fn park_read(&self, fire: impl FnOnce(ReadOutcome<T>) + Send + 'static) -> WaiterId {
        self.lock().readers.connect(fire)
    }

    /// Unconditional write counterpart of [`Engine::park_read`].
    pub(crate) fn park_write(
        &self,
        v: T,
        fire: impl FnOnce(Result<(), ChannelError>) + Send + 'static,
    ) -> WaiterId {
        self.lock().writers.connect(v, fire)
    }

    pub(crate) fn disconnect_read(&self, id: WaiterId) {
        self.lock().readers.disconnect(id);
    }

    pub(crate) fn disconnect_write(&self, id: WaiterId) {
        self.lock().writers.disconnect(id);
    }

    /// §4.D `close`. Returns `true` the first time, `false` thereafter.
    /// Drained waiters fire, and wakers wake, only after the lock is released.
    pub(crate) fn close(&self) -> bool {
        let (drained_writers, drained_readers, wakers) = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            let drained_writers = state.writers.close();
            let drained_readers = state.readers.close();
            let wakers = std::mem::take(&mut state.close_wakers);
            (drained_writers, drained_readers, wakers)
        };
        for waiter in drained_writers {
            waiter.fire(Err(ChannelError::Closed));
        }
        for waiter in drained_readers {
            waiter.fire(ReadOutcome::EndOfStream);
        }
        for w in wakers {
            w.wake();
        }
        true
    }

    /// Registers `waker` to be woken on close. Returns `true` if the
    /// channel was already closed (caller should not park).
    pub(crate) fn register_close_waker(&self, waker: Waker) -> bool {
        let mut state = self.lock();
        if state.closed {
            return true;
        }
        state.close_wakers.push(waker);
        false
    }
}
