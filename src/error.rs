use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// An opaque reason carried by a cancellation. Cloneable so the same
/// cancellation can be observed by several parked operations at once.
#[derive(Clone)]
pub struct CancelReason(Arc<dyn std::error::Error + Send + Sync>);

impl CancelReason {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    pub fn message(msg: impl Into<String>) -> Self {
        #[derive(Debug, Error)]
        #[error("{0}")]
        struct Message(String);
        Self::new(Message(msg.into()))
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Error kinds surfaced by the channel and select core.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// A write targeted a channel that is already closed.
    #[error("channel is closed")]
    Closed,
    /// A parked operation was cancelled via its abort signal.
    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),
}

impl ChannelError {
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled(_))
    }
}
