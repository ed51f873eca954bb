//! The live metrics coordination loop.
//!
//! While nobody is watching, the coordinator pings the service on the ping
//! interval. When a ping reports the service as active it switches to send
//! cycles (prepare, then send) on the post interval, and it falls back to
//! pinging as soon as the sender reports the service as idle again. Any
//! failed call is followed by the error interval, in the same mode.
//!
//! Redirects carried by either pings or sends replace the default endpoint
//! until their validity window runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collaborator::{DataFetcher, DataSender, PingSender};
use crate::config::{ConfigError, IntervalConfig};
use crate::directive::Directive;
use crate::redirect::RedirectState;
use crate::shutdown::{StopHandle, StopSignal};

/// What the loop is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Probing the service on the ping interval
    Pinging,
    /// Running fetch+send cycles on the post interval
    Sending,
    /// The loop has exited
    Stopped,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Pinging => write!(f, "pinging"),
            Mode::Sending => write!(f, "sending"),
            Mode::Stopped => write!(f, "stopped"),
        }
    }
}

/// Counters for one run of the loop, returned when it exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Pings that returned a directive
    pub pings: u64,

    /// Fetch+send cycles that completed
    pub posts: u64,

    /// Failed pings, fetches or sends
    pub failures: u64,

    /// Pinging → Sending transitions
    pub activations: u64,

    /// Sending → Pinging transitions
    pub deactivations: u64,

    /// Redirects applied from pings or sends
    pub redirects: u64,
}

/// State owned by the loop for the duration of one run.
struct LoopState {
    mode: Mode,
    redirect: RedirectState,
    stats: CycleStats,
}

/// Drives the ping / post state machine.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use live_metrics_agent::buffer::TelemetryBuffer;
/// use live_metrics_agent::client::LiveMetricsClient;
/// use live_metrics_agent::config::Config;
/// use live_metrics_agent::coordinator::Coordinator;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let (_recorder, buffer, outbox) = TelemetryBuffer::with_defaults();
///     let client = Arc::new(LiveMetricsClient::new(&config, outbox).unwrap());
///
///     let coordinator = Arc::new(
///         Coordinator::new(config.intervals, client.clone(), buffer, client).unwrap(),
///     );
///
///     let task = tokio::spawn({
///         let coordinator = coordinator.clone();
///         async move { coordinator.run().await }
///     });
///
///     coordinator.stop();
///     let stats = task.await.unwrap();
///     println!("{} pings, {} posts", stats.pings, stats.posts);
/// }
/// ```
pub struct Coordinator<P, F, S> {
    intervals: IntervalConfig,
    ping_sender: P,
    fetcher: F,
    sender: S,
    signal: Arc<StopSignal>,
}

impl<P, F, S> Coordinator<P, F, S>
where
    P: PingSender,
    F: DataFetcher,
    S: DataSender,
{
    /// Create a coordinator.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any interval is zero.
    pub fn new(
        intervals: IntervalConfig,
        ping_sender: P,
        fetcher: F,
        sender: S,
    ) -> Result<Self, ConfigError> {
        intervals.validate()?;

        Ok(Self {
            intervals,
            ping_sender,
            fetcher,
            sender,
            signal: Arc::new(StopSignal::default()),
        })
    }

    /// Handle that can stop this coordinator from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.signal.clone())
    }

    /// Request termination. Returns immediately; a sleeping loop wakes up
    /// and exits, a loop inside a call exits once that call returns.
    pub fn stop(&self) {
        self.signal.stop();
    }

    /// Get the coordinator intervals.
    pub fn intervals(&self) -> &IntervalConfig {
        &self.intervals
    }

    /// Run the loop until stopped.
    ///
    /// Failures from collaborators are logged and absorbed; the loop only
    /// exits on [`Coordinator::stop`].
    pub async fn run(&self) -> CycleStats {
        let mut state = LoopState {
            mode: Mode::Pinging,
            redirect: RedirectState::new(),
            stats: CycleStats::default(),
        };

        info!(
            ping_interval_ms = self.intervals.ping_interval.as_millis() as u64,
            post_interval_ms = self.intervals.post_interval.as_millis() as u64,
            error_interval_ms = self.intervals.error_interval.as_millis() as u64,
            "Live metrics coordinator started"
        );

        while !self.signal.is_stopped() {
            let wait = match state.mode {
                Mode::Pinging => self.ping_cycle(&mut state).await,
                Mode::Sending => self.post_cycle(&mut state).await,
                Mode::Stopped => break,
            };

            if let Some(wait) = wait {
                if !self.signal.sleep(wait).await {
                    break;
                }
            }
        }

        state.mode = Mode::Stopped;
        info!(
            mode = %state.mode,
            pings = state.stats.pings,
            posts = state.stats.posts,
            failures = state.stats.failures,
            "Live metrics coordinator stopped"
        );

        state.stats
    }

    /// One ping. Returns how long to wait before the next cycle, or `None`
    /// to start the next cycle right away.
    async fn ping_cycle(&self, state: &mut LoopState) -> Option<Duration> {
        let endpoint = state.redirect.endpoint(Instant::now());

        let directive = match self.ping_sender.ping(endpoint.as_deref()).await {
            Ok(directive) => directive,
            Err(e) => {
                state.stats.failures += 1;
                warn!(
                    error = %e,
                    endpoint = ?endpoint,
                    retry_in_ms = self.intervals.error_interval.as_millis() as u64,
                    "Ping failed"
                );
                return Some(self.intervals.error_interval);
            }
        };

        state.stats.pings += 1;
        self.apply_redirect(state, &directive);

        if directive.is_active() {
            let target = state.redirect.endpoint(Instant::now());
            info!(endpoint = ?target, "Service is active, starting to send");
            state.mode = Mode::Sending;
            state.stats.activations += 1;
            None
        } else {
            let wait = directive
                .polling_interval_hint
                .unwrap_or(self.intervals.ping_interval);
            debug!(wait_ms = wait.as_millis() as u64, "Service is idle");
            Some(wait)
        }
    }

    /// One fetch+send cycle, followed by a look at the sender's directive.
    async fn post_cycle(&self, state: &mut LoopState) -> Option<Duration> {
        let endpoint = state.redirect.endpoint(Instant::now());

        if let Err(e) = self.fetcher.prepare(endpoint.as_deref()).await {
            state.stats.failures += 1;
            warn!(error = %e, endpoint = ?endpoint, "Failed to prepare telemetry");
            return Some(self.intervals.error_interval);
        }

        if let Err(e) = self.sender.start_sending().await {
            state.stats.failures += 1;
            warn!(error = %e, endpoint = ?endpoint, "Failed to send telemetry");
            return Some(self.intervals.error_interval);
        }

        state.stats.posts += 1;

        let directive = self.sender.directive();
        self.apply_redirect(state, &directive);

        if directive.is_active() {
            Some(self.intervals.post_interval)
        } else {
            info!("Service is idle, returning to ping");
            state.mode = Mode::Pinging;
            state.stats.deactivations += 1;
            None
        }
    }

    fn apply_redirect(&self, state: &mut LoopState, directive: &Directive) {
        if state.redirect.apply(directive, Instant::now()) {
            state.stats.redirects += 1;
        }
    }
}
