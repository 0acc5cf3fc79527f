//! Message reader capability.

use crate::error::ReadError;
use crate::message::Message;
use async_trait::async_trait;
use tokio::sync::watch;

/// Source of messages for the consumer loop.
///
/// Implementations pull the next message from the stream and release their
/// client resources on `close`. They never retry on their own; the consumer
/// loop owns the retry policy.
///
/// # Cancellation
///
/// `read` must return `ReadError::Canceled` promptly once the shutdown
/// receiver holds `true` or its sender has been dropped.
///
/// # Example
///
/// ```rust,ignore
/// use kafka_consumer::{Message, MessageReader, ReadError};
///
/// struct VecReader(Vec<Message>);
///
/// #[async_trait]
/// impl MessageReader for VecReader {
///     async fn read(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Message, ReadError> {
///         if *shutdown.borrow() {
///             return Err(ReadError::Canceled);
///         }
///         self.0.pop().ok_or(ReadError::Canceled)
///     }
///
///     fn close(&mut self) -> Result<(), ReadError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next message, blocking until one arrives, an error occurs,
    /// or shutdown is requested.
    async fn read(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Message, ReadError>;

    /// Release the underlying client. Safe to call more than once.
    fn close(&mut self) -> Result<(), ReadError>;

    /// Topic label used for this reader's metrics.
    fn topic(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<R: MessageReader + ?Sized> MessageReader for Box<R> {
    async fn read(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Message, ReadError> {
        (**self).read(shutdown).await
    }

    fn close(&mut self) -> Result<(), ReadError> {
        (**self).close()
    }

    fn topic(&self) -> &str {
        (**self).topic()
    }
}
