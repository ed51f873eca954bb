//! Live Metrics Agent Library
//!
//! This library provides the components of a live metrics agent:
//!
//! - **coordinator**: the loop deciding when to ping and when to stream
//! - **directive**: the service's active/idle signal, redirect and polling hint
//! - **redirect**: the time-bounded endpoint override
//! - **collaborator**: the ping / fetch / send contracts the coordinator drives
//! - **client**: HTTP implementation of the ping and send contracts
//! - **buffer**: in-memory telemetry buffer implementing the fetch contract
//! - **telemetry**: telemetry items and batches
//! - **config**: environment-based configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use live_metrics_agent::buffer::{BufferConfig, TelemetryBuffer};
//! use live_metrics_agent::client::LiveMetricsClient;
//! use live_metrics_agent::config::Config;
//! use live_metrics_agent::coordinator::Coordinator;
//! use live_metrics_agent::telemetry::TelemetryItem;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     // Buffer recorded telemetry between posts
//!     let buffer_config = BufferConfig::new(config.buffer_capacity, config.instance.clone());
//!     let (recorder, buffer, outbox) = TelemetryBuffer::new(buffer_config);
//!
//!     // One HTTP client pings and posts
//!     let client = LiveMetricsClient::new(&config, outbox).expect("Failed to create client");
//!     let client = Arc::new(client);
//!
//!     let coordinator = Arc::new(
//!         Coordinator::new(config.intervals, client.clone(), buffer, client)
//!             .expect("Invalid intervals"),
//!     );
//!     let task = tokio::spawn({
//!         let coordinator = coordinator.clone();
//!         async move { coordinator.run().await }
//!     });
//!
//!     recorder.send(TelemetryItem::metric("requests.rate", 12.0)).await.ok();
//!
//!     coordinator.stop();
//!     task.await.ok();
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod client;
pub mod collaborator;
pub mod config;
pub mod coordinator;
pub mod directive;
pub mod redirect;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferConfig, BufferError, BufferSender, BufferStats, TelemetryBuffer};
pub use client::{ClientError, ClientStats, LiveMetricsClient};
pub use collaborator::{BoxError, DataFetcher, DataSender, PingSender};
pub use config::{Config, ConfigError, IntervalConfig};
pub use coordinator::{Coordinator, CycleStats, Mode};
pub use directive::{Directive, Redirect, ServiceStatus};
pub use shutdown::StopHandle;
pub use telemetry::{TelemetryBatch, TelemetryItem, TelemetryKind};
