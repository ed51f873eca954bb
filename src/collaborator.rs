//! Contracts between the coordinator and the components it drives.
//!
//! The coordinator calls these one at a time from its own task. Errors are
//! boxed so any implementation can report its own failure type.

use std::sync::Arc;

use async_trait::async_trait;

use crate::directive::Directive;

/// Error type crossing the collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Issues the lightweight status check.
#[async_trait]
pub trait PingSender: Send + Sync {
    /// Ask the service what it wants. `None` targets the default endpoint.
    async fn ping(&self, endpoint: Option<&str>) -> Result<Directive, BoxError>;
}

/// Prepares buffered telemetry for transmission.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Queue what is currently buffered for `endpoint` (`None` = default).
    async fn prepare(&self, endpoint: Option<&str>) -> Result<(), BoxError>;
}

/// Transmits prepared telemetry.
#[async_trait]
pub trait DataSender: Send + Sync {
    /// Send everything prepared so far. Data already sent is never resent.
    async fn start_sending(&self) -> Result<(), BoxError>;

    /// The directive observed on the most recent send, without a network
    /// call. IDLE until something has been observed.
    fn directive(&self) -> Directive;
}

// Shared collaborators: one client usually plays both ping and send roles.

#[async_trait]
impl<T: PingSender + ?Sized> PingSender for Arc<T> {
    async fn ping(&self, endpoint: Option<&str>) -> Result<Directive, BoxError> {
        (**self).ping(endpoint).await
    }
}

#[async_trait]
impl<T: DataFetcher + ?Sized> DataFetcher for Arc<T> {
    async fn prepare(&self, endpoint: Option<&str>) -> Result<(), BoxError> {
        (**self).prepare(endpoint).await
    }
}

#[async_trait]
impl<T: DataSender + ?Sized> DataSender for Arc<T> {
    async fn start_sending(&self) -> Result<(), BoxError> {
        (**self).start_sending().await
    }

    fn directive(&self) -> Directive {
        (**self).directive()
    }
}
