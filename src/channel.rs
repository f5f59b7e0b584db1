//! The public `Channel<T>` façade: construction, synchronous `try_*`,
//! always-`Future` `read`/`write`, case factories for `select`, and the
//! close/length/capacity accessors.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};

use crate::case::{ReadCase, WriteCase};
use crate::cancel::CancelSignal;
use crate::engine::{Engine, ReadAttempt, TryRead, TryWrite, WriteAttempt};
use crate::error::ChannelError;
use crate::future::{Completion, CompletionFuture};
use crate::pool::ReadOutcome;

/// Per-call options shared by `read`/`try_read`/`write`/`try_write`: just an
/// optional cancellation signal.
///
/// The outcome of a closed or cancelled operation is always reported through
/// the return type (`Result`/`ReadValue`/`WriteValue`) rather than by
/// raising — there is no separate "throwing" mode to opt out of with a
/// `silent` flag, Rust's `Result` already *is* the silent form. See
/// `DESIGN.md` for the reasoning.
#[derive(Clone, Default)]
pub struct ReadOptions {
    pub signal: Option<Arc<dyn CancelSignal>>,
}

#[derive(Clone, Default)]
pub struct WriteOptions {
    pub signal: Option<Arc<dyn CancelSignal>>,
}

/// A bounded, multi-producer multi-consumer rendezvous channel.
///
/// `Channel::new(0)` is a strict rendezvous channel: every write blocks
/// until a reader is parked to receive it (and vice versa). `Channel::new(n)`
/// for `n > 0` adds an `n`-slot FIFO buffer so a write can complete without
/// an already-waiting reader, up to that many outstanding values.
pub struct Channel<T> {
    engine: Arc<Engine<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone() }
    }
}

impl<T: Send + 'static> Channel<T> {
    pub fn new(capacity: usize) -> Self {
        Self { engine: Arc::new(Engine::new(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        self.engine.capacity()
    }

    /// Number of values currently buffered (not counting parked writers
    /// waiting for a reader).
    pub fn length(&self) -> usize {
        self.engine.len()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// Closes the channel. Idempotent; every parked reader observes
    /// end-of-stream and every parked writer observes [`ChannelError::Closed`].
    /// Returns `true` the first time, `false` on later calls.
    pub fn close(&self) -> bool {
        self.engine.close()
    }

    /// Resolves once the channel is closed (possibly already closed now).
    pub fn wait_for_close(&self) -> impl Future<Output = ()> + Send + 'static
    where
        T: 'static,
    {
        CloseFuture { engine: self.engine.clone() }
    }

    /// Non-blocking read. `Ok(None)` means the channel was empty and no
    /// writer was waiting; `Ok(Some(v))` a value; `Err` end-of-stream or
    /// cancellation (cancellation is only observed here if `opts.signal` was
    /// already aborted before the call).
    pub fn try_read(&self, opts: &ReadOptions) -> Result<Option<T>, ChannelError> {
        if let Some(sig) = &opts.signal {
            if let Some(reason) = sig.reason() {
                return Err(ChannelError::Cancelled(reason));
            }
        }
        match self.engine.try_read() {
            TryRead::Value(v) => Ok(Some(v)),
            TryRead::EndOfStream => Err(ChannelError::Closed),
            TryRead::NotReady => Ok(None),
        }
    }

    /// Non-blocking write. `Ok(true)` accepted the value (buffered or
    /// handed directly to a parked reader); `Ok(false)` no room and no
    /// reader; `Err` closed or already-cancelled.
    pub fn try_write(&self, v: T, opts: &WriteOptions) -> Result<bool, ChannelError> {
        if let Some(sig) = &opts.signal {
            if let Some(reason) = sig.reason() {
                return Err(ChannelError::Cancelled(reason));
            }
        }
        match self.engine.try_write(v) {
            TryWrite::Buffered | TryWrite::HandedOff => Ok(true),
            TryWrite::Full(_) => Ok(false),
            TryWrite::Closed(_) => Err(ChannelError::Closed),
        }
    }

    /// Reads a value, suspending the awaiting task until one is available,
    /// the channel closes, or `opts.signal` aborts.
    pub fn read(&self, opts: ReadOptions) -> impl Future<Output = Result<T, ChannelError>> + Send + 'static {
        ReadFuture::new(self.engine.clone(), opts)
    }

    /// Writes a value, suspending the awaiting task until it is accepted,
    /// the channel closes, or `opts.signal` aborts.
    pub fn write(&self, v: T, opts: WriteOptions) -> impl Future<Output = Result<(), ChannelError>> + Send + 'static {
        WriteFuture::new(self.engine.clone(), v, opts)
    }

    /// A fresh, arm-able read operation for use with [`crate::select::select`].
    pub fn read_case(&self) -> ReadCase<T> {
        ReadCase::new(self.engine.clone())
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// A fresh, arm-able write operation carrying `v`, for use with
    /// [`crate::select::select`]. `T: Clone` lets the same case be re-armed
    /// in a later `select` call after losing a round.
    pub fn write_case(&self, v: T) -> WriteCase<T> {
        WriteCase::new(self.engine.clone(), v)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum SentinelKind {
    Never,
    Closed,
}

type SentinelRegistry = Mutex<HashMap<(TypeId, SentinelKind), Box<dyn Any + Send + Sync>>>;

fn sentinel_registry() -> &'static SentinelRegistry {
    static REGISTRY: OnceLock<SentinelRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn sentinel<T: Send + 'static>(kind: SentinelKind) -> Channel<T> {
    let registry = sentinel_registry();
    let mut guard = registry.lock().expect("sentinel registry poisoned");
    let key = (TypeId::of::<T>(), kind);
    let boxed = guard.entry(key).or_insert_with(|| {
        let chan = Channel::<T>::new(0);
        if kind == SentinelKind::Closed {
            chan.close();
        }
        Box::new(chan) as Box<dyn Any + Send + Sync>
    });
    boxed
        .downcast_ref::<Channel<T>>()
        .expect("sentinel registry key collision for this type")
        .clone()
}

impl<T: Send + 'static> Channel<T> {
    /// A channel on which no read, write, or select case ever fires: it is
    /// never written to and never closed. One shared instance per `T`, built
    /// the first time it is asked for.
    ///
    /// Useful as a placeholder branch in a `select` (e.g. disabling a case
    /// conditionally by swapping in `Channel::never()` for it) the same way
    /// a nil channel does in Go's `select`.
    pub fn never() -> Self {
        sentinel(SentinelKind::Never)
    }

    /// A channel that is already closed. One shared instance per `T`, built
    /// (and closed) the first time it is asked for.
    pub fn closed() -> Self {
        sentinel(SentinelKind::Closed)
    }
}

struct CloseFuture<T> {
    engine: Arc<Engine<T>>,
}

impl<T> Future for CloseFuture<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.engine.is_closed() {
            return Poll::Ready(());
        }
        if self.engine.register_close_waker(cx.waker().clone()) {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

/// Drives a read to completion across however many times the underlying
/// task is polled: first a synchronous attempt, then (if not ready) a single
/// park bridged to a [`Completion`], re-checked on every subsequent poll in
/// case the waker fired between polls.
struct ReadFuture<T> {
    engine: Arc<Engine<T>>,
    opts: ReadOptions,
    state: ReadFutureState<T>,
}

enum ReadFutureState<T> {
    Init,
    Parked(Pin<Box<CompletionFuture<Result<T, ChannelError>>>>, Option<crate::cancel::Unsubscribe>),
}

impl<T: Send + 'static> ReadFuture<T> {
    fn new(engine: Arc<Engine<T>>, opts: ReadOptions) -> Self {
        Self { engine, opts, state: ReadFutureState::Init }
    }
}

impl<T: Send + 'static> Future for ReadFuture<T> {
    type Output = Result<T, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReadFutureState::Init => {
                    if let Some(sig) = &this.opts.signal {
                        if let Some(reason) = sig.reason() {
                            return Poll::Ready(Err(ChannelError::Cancelled(reason)));
                        }
                    }

                    let completion = Completion::new();
                    let completion_for_fire = completion.clone();
                    let unsub = this.opts.signal.as_ref().map(|sig| {
                        let completion = completion.clone();
                        sig.subscribe(Box::new(move |reason| {
                            completion.complete(Err(ChannelError::Cancelled(reason)));
                        }))
                    });

                    match this.engine.try_read_or_park(move |out| {
                        completion_for_fire.complete(match out {
                            ReadOutcome::Value(v) => Ok(v),
                            ReadOutcome::EndOfStream => Err(ChannelError::Closed),
                        });
                    }) {
                        ReadAttempt::Value(v) => {
                            if let Some(u) = unsub {
                                u.unsubscribe();
                            }
                            return Poll::Ready(Ok(v));
                        }
                        ReadAttempt::EndOfStream => {
                            if let Some(u) = unsub {
                                u.unsubscribe();
                            }
                            return Poll::Ready(Err(ChannelError::Closed));
                        }
                        ReadAttempt::Parked(_id) => {
                            let fut = CompletionFuture(completion);
                            this.state = ReadFutureState::Parked(Box::pin(fut), unsub);
                        }
                    }
                }
                ReadFutureState::Parked(fut, unsub) => {
                    return match fut.as_mut().poll(cx) {
                        Poll::Ready(out) => {
                            if let Some(u) = unsub.take() {
                                u.unsubscribe();
                            }
                            Poll::Ready(out)
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }
}

struct WriteFuture<T> {
    engine: Arc<Engine<T>>,
    opts: WriteOptions,
    state: WriteFutureState<T>,
}

enum WriteFutureState<T> {
    Init(Option<T>),
    Parked(Pin<Box<CompletionFuture<Result<(), ChannelError>>>>, Option<crate::cancel::Unsubscribe>),
}

impl<T: Send + 'static> WriteFuture<T> {
    fn new(engine: Arc<Engine<T>>, v: T, opts: WriteOptions) -> Self {
        Self { engine, opts, state: WriteFutureState::Init(Some(v)) }
    }
}

impl<T: Send + 'static> Future for WriteFuture<T> {
    type Output = Result<(), ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                WriteFutureState::Init(v) => {
                    if let Some(sig) = &this.opts.signal {
                        if let Some(reason) = sig.reason() {
                            return Poll::Ready(Err(ChannelError::Cancelled(reason)));
                        }
                    }

                    let v = v.take().expect("WriteFutureState::Init always holds a value until parked");
                    let completion = Completion::new();
                    let completion_for_fire = completion.clone();
                    let unsub = this.opts.signal.as_ref().map(|sig| {
                        let completion = completion.clone();
                        sig.subscribe(Box::new(move |reason| {
                            completion.complete(Err(ChannelError::Cancelled(reason)));
                        }))
                    });

                    match this.engine.try_write_or_park(v, move |result| {
                        completion_for_fire.complete(result);
                    }) {
                        WriteAttempt::Buffered | WriteAttempt::HandedOff => {
                            if let Some(u) = unsub {
                                u.unsubscribe();
                            }
                            return Poll::Ready(Ok(()));
                        }
                        WriteAttempt::Closed => {
                            if let Some(u) = unsub {
                                u.unsubscribe();
                            }
                            return Poll::Ready(Err(ChannelError::Closed));
                        }
                        WriteAttempt::Parked(_id) => {
                            let fut = CompletionFuture(completion);
                            this.state = WriteFutureState::Parked(Box::pin(fut), unsub);
                        }
                    }
                }
                WriteFutureState::Parked(fut, unsub) => {
                    return match fut.as_mut().poll(cx) {
                        Poll::Ready(out) => {
                            if let Some(u) = unsub.take() {
                                u.unsubscribe();
                            }
                            Poll::Ready(out)
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;

    fn noop_cx() -> Context<'static> {
        let waker = futures::task::noop_waker_ref();
        Context::from_waker(waker)
    }

    #[test]
    fn try_read_and_try_write_roundtrip_through_buffer() {
        let ch: Channel<i32> = Channel::new(1);
        assert!(ch.try_write(10, &WriteOptions::default()).unwrap());
        assert_eq!(ch.try_read(&ReadOptions::default()).unwrap(), Some(10));
    }

    #[test]
    fn try_read_on_empty_unbuffered_is_not_ready() {
        let ch: Channel<i32> = Channel::new(0);
        assert_eq!(ch.try_read(&ReadOptions::default()).unwrap(), None);
    }

    #[test]
    fn close_then_try_read_is_end_of_stream() {
        let ch: Channel<i32> = Channel::new(0);
        ch.close();
        assert!(matches!(ch.try_read(&ReadOptions::default()), Err(ChannelError::Closed)));
    }

    #[test]
    fn close_is_idempotent_and_reported() {
        let ch: Channel<i32> = Channel::new(0);
        assert!(ch.close());
        assert!(!ch.close());
        assert!(ch.is_closed());
    }

    #[test]
    fn read_future_resolves_synchronously_when_value_present() {
        let ch: Channel<i32> = Channel::new(1);
        ch.try_write(5, &WriteOptions::default()).unwrap();
        let mut fut = Box::pin(ch.read(ReadOptions::default()));
        let mut cx = noop_cx();
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 5),
            other => panic!("expected an immediate value, got pending: {}", matches!(other, Poll::Pending)),
        }
    }

    #[test]
    fn read_future_parks_then_resolves_on_write() {
        let ch: Channel<i32> = Channel::new(0);
        let mut fut = Box::pin(ch.read(ReadOptions::default()));
        let mut cx = noop_cx();
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        ch.try_write(77, &WriteOptions::default()).unwrap();
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 77),
            other => panic!("expected a value after the write, got pending: {}", matches!(other, Poll::Pending)),
        }
    }

    #[test]
    fn write_future_parks_then_resolves_on_read() {
        let ch: Channel<i32> = Channel::new(0);
        let mut fut = Box::pin(ch.write(3, WriteOptions::default()));
        let mut cx = noop_cx();
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(ch.try_read(&ReadOptions::default()).unwrap(), Some(3));
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(())) => {}
            other => panic!("expected the write to complete, got pending: {}", matches!(other, Poll::Pending)),
        }
    }

    #[test]
    fn read_future_cancelled_while_parked() {
        let ch: Channel<i32> = Channel::new(0);
        let ctl = crate::cancel::Cancellation::new();
        let mut fut = Box::pin(ch.read(ReadOptions { signal: Some(ctl.signal()) }));
        let mut cx = noop_cx();
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        ctl.cancel(CancelReason::message("abort"));
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Err(ChannelError::Cancelled(r))) => assert_eq!(r.to_string(), "abort"),
            other => panic!("expected cancellation, got a different poll result: {}", matches!(other, Poll::Pending)),
        }
    }

    #[test]
    fn wait_for_close_resolves_after_close() {
        let ch: Channel<i32> = Channel::new(0);
        let mut fut = Box::pin(ch.wait_for_close());
        let mut cx = noop_cx();
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Pending);
        ch.close();
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn read_case_and_write_case_are_usable_with_select() {
        let ch: Channel<i32> = Channel::new(1);
        ch.try_write(1, &WriteOptions::default()).unwrap();
        let case = ch.read_case();
        assert!(crate::case::SelectCase::try_invoke(&case));
        assert_eq!(case.read().unwrap().value, Some(1));
    }

    // Each sentinel test uses its own `T` so the process-wide registry entry
    // it touches can't be mutated by another test running concurrently.

    #[test]
    fn never_channel_is_never_ready() {
        let never: Channel<u8> = Channel::never();
        assert_eq!(never.try_read(&ReadOptions::default()).unwrap(), None);
        assert!(!never.is_closed());
    }

    #[test]
    fn never_channel_is_a_shared_singleton_per_type() {
        let a: Channel<u16> = Channel::never();
        let b: Channel<u16> = Channel::never();
        // `never` is unbuffered, so a write with no parked reader just sits
        // as `Full`: this only demonstrates the handles share an engine if we
        // observe that a parked reader on `a` is what makes `b`'s write
        // succeed.
        let read = a.read_case();
        assert!(!crate::case::SelectCase::try_invoke(&read));
        let park_result = crate::case::SelectCase::park(&read, std::sync::Arc::new(|| {}));
        assert!(matches!(park_result, crate::case::ParkResult::Parked(_)));
        assert!(b.try_write(1, &WriteOptions::default()).unwrap());
        assert_eq!(read.read().unwrap().value, Some(1));
    }

    #[test]
    fn closed_channel_sentinel_is_already_closed() {
        let closed: Channel<u32> = Channel::closed();
        assert!(closed.is_closed());
        assert!(matches!(closed.try_read(&ReadOptions::default()), Err(ChannelError::Closed)));
    }
}
