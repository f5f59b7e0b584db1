//! CSP-style bounded channels with a multi-way select operator.
//!
//! A [`Channel<T>`](channel::Channel) is a rendezvous point shared by any
//! number of readers and writers: with no buffer (`capacity == 0`) every
//! transfer requires a reader and a writer to meet; with a buffer, writes
//! succeed up to `capacity` outstanding values before they start blocking.
//! [`select::select`] races several channels' read/write operations at once
//! and reports whichever resolves first, with uniformly random tie-breaking
//! when more than one is ready simultaneously.
//!
//! The core (`engine`, `pool`, `waiter`, `ring`) only talks in terms of
//! synchronous checks and fire-once callbacks; [`future`] is the one place
//! that bridges those callbacks to `std::future::Future`, and [`channel`]
//! is the public surface built on top of it.

mod cancel;
mod case;
mod channel;
mod engine;
mod error;
mod future;
mod pool;
mod ring;
mod select;
mod waiter;

pub use cancel::{CancelSignal, Cancellation, Unsubscribe};
pub use case::{CaseConnection, CaseId, ParkResult, ReadCase, ReadValue, SelectCase, WriteCase, WriteValue};
pub use channel::{Channel, ReadOptions, WriteOptions};
pub use error::{CancelReason, ChannelError};
pub use select::{select, SelectOptions, SelectOutcome};
