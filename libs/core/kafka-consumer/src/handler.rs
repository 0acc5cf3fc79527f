//! Message handler capability.

use crate::error::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Per-message processing.
///
/// The consumer loop calls `handle` serially, never concurrently, with the
/// key and value of each message it reads. Returning `Err` means the message
/// could not be processed: the loop logs it and moves on to the next one.
/// There is no re-delivery, since the reader has already advanced past it.
///
/// `shutdown` is the loop's cancellation signal. Long-running handlers can
/// watch it to give up early; the loop itself always awaits the call.
///
/// # Example
///
/// ```rust,ignore
/// use kafka_consumer::{Handler, HandlerError};
///
/// struct OrderHandler {
///     service: Arc<OrderService>,
/// }
///
/// #[async_trait]
/// impl Handler for OrderHandler {
///     async fn handle(
///         &self,
///         _shutdown: &watch::Receiver<bool>,
///         _key: &[u8],
///         value: &[u8],
///     ) -> Result<(), HandlerError> {
///         let order: Order = serde_json::from_slice(value)
///             .map_err(|e| HandlerError::failed(e.to_string()))?;
///         self.service.apply(order).await.map_err(|e| HandlerError::Other(e.into()))
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message. `key` is empty for unkeyed messages.
    async fn handle(
        &self,
        shutdown: &watch::Receiver<bool>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(
        &self,
        shutdown: &watch::Receiver<bool>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), HandlerError> {
        (**self).handle(shutdown, key, value).await
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Box<H> {
    async fn handle(
        &self,
        shutdown: &watch::Receiver<bool>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), HandlerError> {
        (**self).handle(shutdown, key, value).await
    }
}

/// Forward a single message to a handler outside of the consumer loop.
///
/// No retry and no classification: the handler's result is returned as is.
pub async fn consume_message<H: Handler + ?Sized>(
    shutdown: &watch::Receiver<bool>,
    handler: &H,
    key: &[u8],
    value: &[u8],
) -> Result<(), HandlerError> {
    handler.handle(shutdown, key, value).await
}

/// Handler that logs every payload it receives.
#[derive(Debug, Clone, Default)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle(
        &self,
        _shutdown: &watch::Receiver<bool>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), HandlerError> {
        info!(
            key = %String::from_utf8_lossy(key),
            value = %String::from_utf8_lossy(value),
            bytes = value.len(),
            "Handled message"
        );
        Ok(())
    }
}
