//! Arm-able views over a pending channel operation — the participants the
//! select operator shuffles and races.
//!
//! Every call to [`crate::channel::Channel::read_case`] /
//! [`crate::channel::Channel::write_case`] returns a fresh instance; two
//! cases are equal only if they are the same instance (`CaseId` equality),
//! never by the channel or value they wrap. A [`WriteCase`] keeps its value
//! across repeated [`WriteCase::reset`] calls so the same case object can be
//! fed into `select` again after losing a race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, ReadAttempt, TryRead, TryWrite, WriteAttempt};
use crate::error::CancelReason;
use crate::pool::ReadOutcome;

static NEXT_CASE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a [`ReadCase`]/[`WriteCase`] instance, stable across `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseId(u64);

impl CaseId {
    fn new() -> Self {
        Self(NEXT_CASE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A live park registered by [`SelectCase::park`]. Dropping it leaks the
/// park (it stays registered); call [`CaseConnection::disconnect`]
/// explicitly once a select round is decided. Disconnecting a waiter that
/// already fired is a no-op.
pub struct CaseConnection {
    disconnect: Box<dyn FnOnce() + Send>,
}

impl CaseConnection {
    pub fn disconnect(self) {
        (self.disconnect)()
    }
}

/// Result of [`SelectCase::park`]: either the case resolved synchronously
/// while arming (no connection to track), or it's parked and live.
pub enum ParkResult {
    CompletedImmediately,
    Parked(CaseConnection),
}

/// Object-safe seam the select operator drives, implemented by [`ReadCase`]
/// and [`WriteCase`] regardless of element type, so one `Vec<&dyn
/// SelectCase>` can mix read and write cases over unrelated channels.
pub trait SelectCase: Send + Sync {
    fn id(&self) -> CaseId;
    /// Clears any outcome from a previous round so the case can be reused.
    fn reset(&self);
    /// Synchronous, non-parking attempt. Returns `true` if an outcome was
    /// stored (inspect it via the case's own `read()`/`write()` accessor).
    fn try_invoke(&self) -> bool;
    /// Arms the case: one more synchronous check and, only if still not
    /// ready, parks. `on_fire` runs after the outcome is stored, exactly
    /// once, whether that happens synchronously here or later from a
    /// waiter callback.
    fn park(&self, on_fire: Arc<dyn Fn() + Send + Sync>) -> ParkResult;
}

/// `{closed, ok, value, reason}`. `closed = None` means cancelled,
/// `Some(true)` end-of-stream, `Some(false)` a value was read.
#[derive(Debug)]
pub struct ReadValue<T> {
    pub closed: Option<bool>,
    pub ok: bool,
    pub value: Option<T>,
    pub reason: Option<CancelReason>,
}

impl<T> ReadValue<T> {
    fn from_outcome(out: ReadOutcome<T>) -> Self {
        match out {
            ReadOutcome::Value(v) => Self { closed: Some(false), ok: true, value: Some(v), reason: None },
            ReadOutcome::EndOfStream => Self { closed: Some(true), ok: false, value: None, reason: None },
        }
    }
}

/// `{ok, error, reason}`.
#[derive(Debug)]
pub struct WriteValue {
    pub ok: bool,
    pub error: bool,
    pub reason: Option<CancelReason>,
}

impl WriteValue {
    fn ok() -> Self {
        Self { ok: true, error: false, reason: None }
    }

    fn closed() -> Self {
        Self { ok: false, error: true, reason: None }
    }
}

/// An arm-able read operation on a specific channel.
pub struct ReadCase<T> {
    id: CaseId,
    engine: Arc<Engine<T>>,
    outcome: Arc<Mutex<Option<ReadValue<T>>>>,
}

impl<T: Send + 'static> ReadCase<T> {
    pub(crate) fn new(engine: Arc<Engine<T>>) -> Self {
        Self { id: CaseId::new(), engine, outcome: Arc::new(Mutex::new(None)) }
    }

    pub fn id(&self) -> CaseId {
        self.id
    }

    pub fn reset(&self) {
        *self.outcome.lock().expect("case mutex poisoned") = None;
    }

    /// The stored outcome, or `None` if this case hasn't fired since the
    /// last `reset()`.
    pub fn read(&self) -> Option<ReadValue<T>> {
        self.outcome.lock().expect("case mutex poisoned").clone()
    }
}

impl<T: Clone> Clone for ReadValue<T> {
    fn clone(&self) -> Self {
        Self {
            closed: self.closed,
            ok: self.ok,
            value: self.value.clone(),
            reason: self.reason.clone(),
        }
    }
}

impl<T: Send + 'static> SelectCase for ReadCase<T> {
    fn id(&self) -> CaseId {
        self.id
    }

    fn reset(&self) {
        ReadCase::reset(self)
    }

    fn try_invoke(&self) -> bool {
        match self.engine.try_read() {
            TryRead::Value(v) => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(ReadValue::from_outcome(ReadOutcome::Value(v)));
                true
            }
            TryRead::EndOfStream => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(ReadValue::from_outcome(ReadOutcome::EndOfStream));
                true
            }
            TryRead::NotReady => false,
        }
    }

    fn park(&self, on_fire: Arc<dyn Fn() + Send + Sync>) -> ParkResult {
        let outcome = self.outcome.clone();
        match self.engine.try_read_or_park(move |out| {
            *outcome.lock().expect("case mutex poisoned") = Some(ReadValue::from_outcome(out));
            on_fire();
        }) {
            ReadAttempt::Value(v) => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(ReadValue::from_outcome(ReadOutcome::Value(v)));
                ParkResult::CompletedImmediately
            }
            ReadAttempt::EndOfStream => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(ReadValue::from_outcome(ReadOutcome::EndOfStream));
                ParkResult::CompletedImmediately
            }
            ReadAttempt::Parked(id) => {
                let engine = self.engine.clone();
                ParkResult::Parked(CaseConnection { disconnect: Box::new(move || engine.disconnect_read(id)) })
            }
        }
    }
}

/// An arm-able write operation on a specific channel. Keeps its value across
/// `reset()` so it can be re-armed in a later `select()` call after losing a
/// race; requires `T: Clone` for exactly that reuse.
pub struct WriteCase<T: Clone> {
    id: CaseId,
    engine: Arc<Engine<T>>,
    value: T,
    outcome: Arc<Mutex<Option<WriteValue>>>,
}

impl<T: Clone + Send + 'static> WriteCase<T> {
    pub(crate) fn new(engine: Arc<Engine<T>>, value: T) -> Self {
        Self { id: CaseId::new(), engine, value, outcome: Arc::new(Mutex::new(None)) }
    }

    pub fn id(&self) -> CaseId {
        self.id
    }

    pub fn reset(&self) {
        *self.outcome.lock().expect("case mutex poisoned") = None;
    }

    pub fn write(&self) -> Option<WriteValue> {
        self.outcome.lock().expect("case mutex poisoned").clone()
    }
}

impl Clone for WriteValue {
    fn clone(&self) -> Self {
        Self { ok: self.ok, error: self.error, reason: self.reason.clone() }
    }
}

impl<T: Clone + Send + 'static> SelectCase for WriteCase<T> {
    fn id(&self) -> CaseId {
        self.id
    }

    fn reset(&self) {
        WriteCase::reset(self)
    }

    fn try_invoke(&self) -> bool {
        match self.engine.try_write(self.value.clone()) {
            TryWrite::Buffered | TryWrite::HandedOff => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(WriteValue::ok());
                true
            }
            TryWrite::Closed(_) => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(WriteValue::closed());
                true
            }
            TryWrite::Full(_) => false,
        }
    }

    fn park(&self, on_fire: Arc<dyn Fn() + Send + Sync>) -> ParkResult {
        let outcome = self.outcome.clone();
        match self.engine.try_write_or_park(self.value.clone(), move |result| {
            *outcome.lock().expect("case mutex poisoned") = Some(match result {
                Ok(()) => WriteValue::ok(),
                Err(_) => WriteValue::closed(),
            });
            on_fire();
        }) {
            WriteAttempt::Buffered | WriteAttempt::HandedOff => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(WriteValue::ok());
                ParkResult::CompletedImmediately
            }
            WriteAttempt::Closed => {
                *self.outcome.lock().expect("case mutex poisoned") = Some(WriteValue::closed());
                ParkResult::CompletedImmediately
            }
            WriteAttempt::Parked(id) => {
                let engine = self.engine.clone();
                ParkResult::Parked(CaseConnection { disconnect: Box::new(move || engine.disconnect_write(id)) })
            }
        }
    }
}
