//! Buffer module for accumulating telemetry between posts.
//!
//! Host code records items through a cloneable [`BufferSender`] into a
//! bounded queue that drops its oldest items when full. Each time the
//! coordinator runs a send cycle, [`TelemetryBuffer::prepare`] drains what
//! has been recorded into a [`TelemetryBatch`] and queues it on the outbox
//! that the HTTP client empties.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collaborator::{BoxError, DataFetcher};
use crate::telemetry::{TelemetryBatch, TelemetryItem};

/// Default maximum number of items held between posts.
const DEFAULT_MAX_CAPACITY: usize = 10_000;

/// Default number of prepared batches waiting to be sent.
const DEFAULT_OUTBOX_CAPACITY: usize = 16;

/// Configuration for the telemetry buffer.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum number of items held between posts; recording past this
    /// drops the oldest item
    pub max_capacity: usize,

    /// Capacity of the outbox of prepared batches
    pub outbox_capacity: usize,

    /// Instance name stamped on every batch
    pub source: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            source: "live-metrics-agent".to_string(),
        }
    }
}

impl BufferConfig {
    /// Create a buffer config with the given item capacity and source name.
    pub fn new(max_capacity: usize, source: impl Into<String>) -> Self {
        Self {
            max_capacity,
            source: source.into(),
            ..Self::default()
        }
    }
}

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Total number of items recorded
    pub items_received: u64,

    /// Total number of items placed into prepared batches
    pub items_prepared: u64,

    /// Total number of items dropped because the buffer was full
    pub items_dropped: u64,

    /// Number of batches queued on the outbox
    pub batches_prepared: u64,
}

/// Items recorded since the last prepare, shared with every sender.
#[derive(Debug)]
struct Pending {
    items: VecDeque<TelemetryItem>,
    capacity: usize,
    dropped_since_prepare: u64,
    stats: BufferStats,
}

impl Pending {
    fn record(&mut self, item: TelemetryItem) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped_since_prepare += 1;
            self.stats.items_dropped += 1;
        }

        self.items.push_back(item);
        self.stats.items_received += 1;
    }
}

/// A sender handle for recording telemetry items.
///
/// This can be cloned and shared across producer tasks. Recording never
/// waits: a full buffer drops its oldest item.
#[derive(Clone)]
pub struct BufferSender {
    pending: Weak<Mutex<Pending>>,
}

impl BufferSender {
    /// Record an item.
    ///
    /// Returns an error if the buffer has been closed.
    pub async fn send(&self, item: TelemetryItem) -> Result<(), BufferError> {
        self.try_send(item)
    }

    /// Record an item without an await point.
    ///
    /// Returns an error if the buffer has been closed.
    pub fn try_send(&self, item: TelemetryItem) -> Result<(), BufferError> {
        let pending = self.pending.upgrade().ok_or(BufferError::Closed)?;
        let mut pending = pending.lock().map_err(|_| BufferError::Closed)?;
        pending.record(item);
        Ok(())
    }
}

/// Errors that can occur during buffer operations.
#[derive(Debug)]
pub enum BufferError {
    /// The outbox of prepared batches is full
    Full,

    /// The other end has been dropped
    Closed,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Full => write!(f, "Buffer outbox is full"),
            BufferError::Closed => write!(f, "Buffer has been closed"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Telemetry buffer feeding the send cycles.
pub struct TelemetryBuffer {
    /// Items recorded since the last prepare
    pending: Arc<Mutex<Pending>>,

    /// Prepared batches waiting for the sender
    outbox: mpsc::Sender<TelemetryBatch>,

    config: BufferConfig,
}

impl TelemetryBuffer {
    /// Create a new telemetry buffer.
    ///
    /// Returns the recording handle, the buffer, and the receiving end of
    /// the outbox to hand to the sender.
    pub fn new(config: BufferConfig) -> (BufferSender, Self, mpsc::Receiver<TelemetryBatch>) {
        let pending = Arc::new(Mutex::new(Pending {
            items: VecDeque::new(),
            capacity: config.max_capacity.max(1),
            dropped_since_prepare: 0,
            stats: BufferStats::default(),
        }));
        let (outbox, outbox_rx) = mpsc::channel(config.outbox_capacity);

        let sender = BufferSender {
            pending: Arc::downgrade(&pending),
        };
        let buffer = Self {
            pending,
            outbox,
            config,
        };

        (sender, buffer, outbox_rx)
    }

    /// Create a new telemetry buffer with default configuration.
    pub fn with_defaults() -> (BufferSender, Self, mpsc::Receiver<TelemetryBatch>) {
        Self::new(BufferConfig::default())
    }

    /// Take everything recorded since the last prepare.
    fn drain(&self) -> Vec<TelemetryItem> {
        let Ok(mut pending) = self.pending.lock() else {
            return Vec::new();
        };

        if pending.dropped_since_prepare > 0 {
            warn!(
                drop_count = pending.dropped_since_prepare,
                max_capacity = pending.capacity,
                "Buffer overflow: dropped oldest telemetry"
            );
            pending.dropped_since_prepare = 0;
        }

        pending.items.drain(..).collect()
    }

    fn record_prepared(&self, batch_size: usize) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.stats.items_prepared += batch_size as u64;
            pending.stats.batches_prepared += 1;
        }
    }

    /// Get the number of items waiting for the next prepare.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.items.len()).unwrap_or(0)
    }

    /// Check if nothing is waiting for the next prepare.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> BufferStats {
        self.pending
            .lock()
            .map(|p| p.stats.clone())
            .unwrap_or_default()
    }

    /// Get the buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }
}

#[async_trait]
impl DataFetcher for TelemetryBuffer {
    /// Queue a batch for `endpoint` even when nothing was recorded, so the
    /// send cycle still reaches the service and refreshes the directive.
    async fn prepare(&self, endpoint: Option<&str>) -> Result<(), BoxError> {
        let items = self.drain();
        let batch = TelemetryBatch::new(
            items,
            self.config.source.clone(),
            endpoint.map(str::to_string),
        );
        let batch_size = batch.len();

        self.outbox.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BufferError::Full,
            mpsc::error::TrySendError::Closed(_) => BufferError::Closed,
        })?;

        self.record_prepared(batch_size);

        debug!(batch_size = batch_size, endpoint = ?endpoint, "Prepared telemetry batch");
        Ok(())
    }
}
