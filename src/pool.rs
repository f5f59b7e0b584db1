//! Reader/writer pools: a [`WaiterSet`] plus the dispatch and close-broadcast
//! behavior the engine needs on top of it.
//!
//! Neither pool invokes a waiter's callback itself. `take`/`drain_all`
//! remove waiters and hand them back to the caller (the engine), which fires
//! them only after releasing the lock that guards the pool — see the note
//! on callback reentrancy in `engine.rs`.

use crate::error::ChannelError;
use crate::waiter::{Identified, WaiterId, WaiterSet};

/// What a parked read eventually observes.
#[derive(Debug, Clone)]
pub enum ReadOutcome<T> {
    Value(T),
    EndOfStream,
}

pub(crate) struct ReadWaiter<T> {
    id: WaiterId,
    fire: Box<dyn FnOnce(ReadOutcome<T>) + Send>,
}

impl<T> ReadWaiter<T> {
    pub(crate) fn fire(self, out: ReadOutcome<T>) {
        (self.fire)(out)
    }
}

impl<T> Identified for ReadWaiter<T> {
    fn waiter_id(&self) -> WaiterId {
        self.id
    }
}

/// Parked readers for one channel.
pub(crate) struct ReaderPool<T> {
    waiters: WaiterSet<ReadWaiter<T>>,
    closed: bool,
}

impl<T> Default for ReaderPool<T> {
    fn default() -> Self {
        Self {
            waiters: WaiterSet::new(),
            closed: false,
        }
    }
}

impl<T> ReaderPool<T> {
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Registers a new parked reader, returning its id for later cancellation.
    pub(crate) fn connect(&mut self, fire: impl FnOnce(ReadOutcome<T>) + Send + 'static) -> WaiterId {
        let id = WaiterId::new();
        self.waiters.push(ReadWaiter { id, fire: Box::new(fire) });
        id
    }

    pub(crate) fn disconnect(&mut self, id: WaiterId) {
        self.waiters.remove(id);
    }

    /// Removes a uniformly-chosen parked reader for the caller to fire. The
    /// caller must have checked the pool is non-empty; calling this on an
    /// empty pool is a contract violation.
    pub(crate) fn take(&mut self) -> ReadWaiter<T> {
        self.waiters.pick_random()
    }

    /// Idempotent: marks the pool closed and returns every waiter for the
    /// caller to fire with end-of-stream. Returns an empty `Vec` if already
    /// closed.
    pub(crate) fn close(&mut self) -> Vec<ReadWaiter<T>> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.waiters.drain_all()
    }
}

pub(crate) struct WriteWaiter<T> {
    id: WaiterId,
    value: Option<T>,
    fire: Box<dyn FnOnce(Result<(), ChannelError>) + Send>,
}

impl<T> WriteWaiter<T> {
    /// Takes the carried value, leaving the waiter only able to fire.
    pub(crate) fn take_value(&mut self) -> T {
        self.value.take().expect("write waiter always carries a value")
    }

    pub(crate) fn fire(self, result: Result<(), ChannelError>) {
        (self.fire)(result)
    }
}

impl<T> Identified for WriteWaiter<T> {
    fn waiter_id(&self) -> WaiterId {
        self.id
    }
}

/// Parked writers for one channel.
pub(crate) struct WriterPool<T> {
    waiters: WaiterSet<WriteWaiter<T>>,
    closed: bool,
}

impl<T> Default for WriterPool<T> {
    fn default() -> Self {
        Self {
            waiters: WaiterSet::new(),
            closed: false,
        }
    }
}

impl<T> WriterPool<T> {
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn connect(
        &mut self,
        value: T,
        fire: impl FnOnce(Result<(), ChannelError>) + Send + 'static,
    ) -> WaiterId {
        let id = WaiterId::new();
        self.waiters.push(WriteWaiter {
            id,
            value: Some(value),
            fire: Box::new(fire),
        });
        id
    }

    pub(crate) fn disconnect(&mut self, id: WaiterId) {
        self.waiters.remove(id);
    }

    /// Removes a uniformly-chosen parked writer for the caller to drain its
    /// value from and fire. The caller must have checked the pool is
    /// non-empty.
    pub(crate) fn take(&mut self) -> WriteWaiter<T> {
        self.waiters.pick_random()
    }

    /// Idempotent: marks the pool closed and returns every waiter for the
    /// caller to fire with `ChannelError::Closed`. Returns an empty `Vec` if
    /// already closed.
    pub(crate) fn close(&mut self) -> Vec<WriteWaiter<T>> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        self.waiters.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn reader_pool_take_removes_and_hands_back_a_waiter() {
        let mut pool = ReaderPool::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = seen.clone();
            pool.connect(move |out| seen.lock().unwrap().push((n, format!("{out:?}"))));
        }
        assert_eq!(pool.len(), 3);
        let waiter = pool.take();
        assert_eq!(pool.len(), 2);
        waiter.fire(ReadOutcome::Value(42));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn reader_pool_close_drains_waiters_for_caller_to_fire() {
        let mut pool: ReaderPool<i32> = ReaderPool::default();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let outcomes = outcomes.clone();
            pool.connect(move |out| outcomes.lock().unwrap().push(matches!(out, ReadOutcome::EndOfStream)));
        }
        let drained = pool.close();
        assert!(pool.is_empty());
        assert_eq!(drained.len(), 2);
        for waiter in drained {
            waiter.fire(ReadOutcome::EndOfStream);
        }
        assert_eq!(outcomes.lock().unwrap().len(), 2);
        assert!(outcomes.lock().unwrap().iter().all(|&eos| eos));

        // idempotent: second close returns nothing to fire
        assert!(pool.close().is_empty());
        assert_eq!(outcomes.lock().unwrap().len(), 2);
    }

    #[test]
    fn writer_pool_take_returns_waiter_and_value() {
        let mut pool = WriterPool::default();
        let fired = Arc::new(Mutex::new(false));
        let fired_c = fired.clone();
        pool.connect(7, move |r| *fired_c.lock().unwrap() = r.is_ok());
        let mut waiter = pool.take();
        let value = waiter.take_value();
        assert_eq!(value, 7);
        waiter.fire(Ok(()));
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn writer_pool_close_drains_waiters_for_caller_to_fire_closed() {
        let mut pool = WriterPool::default();
        let errs = Arc::new(Mutex::new(Vec::new()));
        for v in 0..2 {
            let errs = errs.clone();
            pool.connect(v, move |r| errs.lock().unwrap().push(r.err().map(|e| e.is_closed())));
        }
        let drained = pool.close();
        assert!(pool.is_empty());
        assert_eq!(drained.len(), 2);
        for waiter in drained {
            waiter.fire(Err(ChannelError::Closed));
        }
        assert_eq!(errs.lock().unwrap().len(), 2);
        assert!(errs.lock().unwrap().iter().all(|&ok| ok == Some(true)));
    }

    #[test]
    fn disconnect_removes_without_firing() {
        let mut pool: ReaderPool<i32> = ReaderPool::default();
        let fired = Arc::new(Mutex::new(false));
        let fired_c = fired.clone();
        let id = pool.connect(move |_| *fired_c.lock().unwrap() = true);
        pool.disconnect(id);
        assert!(pool.is_empty());
        pool.close();
        assert!(!*fired.lock().unwrap());
    }
}
