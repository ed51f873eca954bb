//! HTTP client for the live metrics service.
//!
//! [`LiveMetricsClient`] implements both the ping and the data sending
//! contracts over a pooled `reqwest` client. The service's directive is read
//! from the response headers of every ping and every post.
//!
//! The client never retries on its own: pacing after failures belongs to
//! the coordinator.

use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::collaborator::{BoxError, DataSender, PingSender};
use crate::config::Config;
use crate::directive::Directive;
use crate::telemetry::TelemetryBatch;

/// Path of the ping resource, relative to the endpoint.
const PING_PATH: &str = "/live/v1/ping";

/// Path of the post resource, relative to the endpoint.
const POST_PATH: &str = "/live/v1/post";

/// Body of a ping request.
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    /// Instance name of this agent
    pub instance: String,

    /// Agent version string
    pub version: &'static str,

    pub timestamp: DateTime<Utc>,
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned an error status code
    Status {
        code: StatusCode,
        message: String,
    },

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Statistics about client operations.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Pings answered by the service
    pub pings_sent: u64,

    /// Batches accepted by the service
    pub batches_sent: u64,

    /// Telemetry items in accepted batches
    pub items_sent: u64,

    /// Requests that failed (transport error or error status)
    pub failed_requests: u64,

    /// Prepared batches discarded after a failed post
    pub batches_dropped: u64,
}

/// HTTP client for the live metrics service.
///
/// # Example
///
/// ```no_run
/// use live_metrics_agent::buffer::TelemetryBuffer;
/// use live_metrics_agent::client::LiveMetricsClient;
/// use live_metrics_agent::collaborator::PingSender;
/// use live_metrics_agent::config::Config;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::default();
///     let (_recorder, _buffer, outbox) = TelemetryBuffer::with_defaults();
///     let client = LiveMetricsClient::new(&config, outbox).expect("Failed to create client");
///
///     match client.ping(None).await {
///         Ok(directive) => println!("Service is {}", directive.status),
///         Err(e) => eprintln!("Ping failed: {}", e),
///     }
/// }
/// ```
pub struct LiveMetricsClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Default base URL of the service
    endpoint: String,

    /// Instance name reported in pings
    instance: String,

    /// Request timeout duration
    timeout: Duration,

    /// Batches prepared by the buffer, waiting to be posted
    outbox: Mutex<mpsc::Receiver<TelemetryBatch>>,

    /// Directive from the most recent successful post
    last_directive: RwLock<Directive>,

    stats: RwLock<ClientStats>,
}

impl LiveMetricsClient {
    /// Create a new client from the agent configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        outbox: mpsc::Receiver<TelemetryBatch>,
    ) -> Result<Self, ClientError> {
        Self::with_settings(
            config.endpoint.clone(),
            config.instance.clone(),
            config.request_timeout,
            outbox,
        )
    }

    /// Create a new client with custom settings.
    pub fn with_settings(
        endpoint: impl Into<String>,
        instance: impl Into<String>,
        timeout: Duration,
        outbox: mpsc::Receiver<TelemetryBatch>,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let endpoint: String = endpoint.into();

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            instance: instance.into(),
            timeout,
            outbox: Mutex::new(outbox),
            last_directive: RwLock::new(Directive::idle()),
            stats: RwLock::new(ClientStats::default()),
        })
    }

    fn url(&self, endpoint: Option<&str>, path: &str) -> String {
        let base = endpoint.unwrap_or(&self.endpoint).trim_end_matches('/');
        format!("{}{}", base, path)
    }

    /// Send a single ping and read the directive from the response.
    async fn send_ping(&self, endpoint: Option<&str>) -> Result<Directive, ClientError> {
        let url = self.url(endpoint, PING_PATH);
        let body = PingRequest {
            instance: self.instance.clone(),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        };

        debug!(url = %url, "Sending ping");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        Self::directive_from_response(response).await
    }

    /// Post one batch and read the directive from the response.
    async fn post_batch(&self, batch: &TelemetryBatch) -> Result<Directive, ClientError> {
        let url = self.url(batch.endpoint.as_deref(), POST_PATH);

        debug!(
            url = %url,
            batch_id = %batch.batch_id,
            batch_size = batch.len(),
            "Posting telemetry batch"
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(batch)
            .send()
            .await?;

        Self::directive_from_response(response).await
    }

    async fn directive_from_response(
        response: reqwest::Response,
    ) -> Result<Directive, ClientError> {
        let status = response.status();

        if status.is_success() {
            Ok(Directive::from_headers(response.headers()))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Take every batch currently waiting in the outbox.
    fn take_prepared(&self) -> Vec<TelemetryBatch> {
        let mut batches = Vec::new();
        if let Ok(mut outbox) = self.outbox.lock() {
            while let Ok(batch) = outbox.try_recv() {
                batches.push(batch);
            }
        }
        batches
    }

    fn record_failure(&self, dropped_batches: u64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.failed_requests += 1;
            stats.batches_dropped += dropped_batches;
        }
    }

    /// Get current client statistics.
    pub fn stats(&self) -> ClientStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Get the configured default endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl PingSender for LiveMetricsClient {
    async fn ping(&self, endpoint: Option<&str>) -> Result<Directive, BoxError> {
        match self.send_ping(endpoint).await {
            Ok(directive) => {
                if let Ok(mut stats) = self.stats.write() {
                    stats.pings_sent += 1;
                }
                Ok(directive)
            }
            Err(e) => {
                self.record_failure(0);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl DataSender for LiveMetricsClient {
    /// Post every prepared batch in order. On the first failure the
    /// remaining batches are discarded.
    async fn start_sending(&self) -> Result<(), BoxError> {
        let batches = self.take_prepared();
        let total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            match self.post_batch(&batch).await {
                Ok(directive) => {
                    if let Ok(mut last) = self.last_directive.write() {
                        *last = directive;
                    }
                    if let Ok(mut stats) = self.stats.write() {
                        stats.batches_sent += 1;
                        stats.items_sent += batch.len() as u64;
                    }
                }
                Err(e) => {
                    let dropped = (total - index) as u64;
                    warn!(
                        error = %e,
                        batch_id = %batch.batch_id,
                        dropped_batches = dropped,
                        "Failed to post telemetry batch"
                    );
                    self.record_failure(dropped);
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    fn directive(&self) -> Directive {
        self.last_directive
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{REDIRECT_HEADER, REDIRECT_TTL_HEADER, SUBSCRIBED_HEADER};
    use crate::telemetry::TelemetryItem;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn test_client(endpoint: &str) -> (LiveMetricsClient, mpsc::Sender<TelemetryBatch>) {
        let (tx, rx) = mpsc::channel(8);
        let client =
            LiveMetricsClient::with_settings(endpoint, "test-agent", Duration::from_secs(5), rx)
                .unwrap();
        (client, tx)
    }

    fn header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Read one HTTP request (head and content-length body).
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Accept a single connection, answer it, and return the raw request.
    async fn serve_once(
        status_line: &'static str,
        headers: Vec<(&'static str, String)>,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;

            let mut response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n",
                status_line
            );
            for (name, value) in headers {
                response.push_str(&format!("{}: {}\r\n", name, value));
            }
            response.push_str("\r\n");

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });

        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: "try later".to_string(),
        };
        assert!(format!("{}", err).contains("503"));
        assert!(format!("{}", err).contains("try later"));

        let err = ClientError::Config("bad tls".to_string());
        assert_eq!(format!("{}", err), "Client configuration error: bad tls");
    }

    #[test]
    fn test_client_creation() {
        let config = Config::default();
        let (_tx, rx) = mpsc::channel(1);
        let client = LiveMetricsClient::new(&config, rx).unwrap();

        assert_eq!(client.endpoint(), "http://localhost:8000");
        assert_eq!(client.timeout(), Duration::from_secs(5));
        assert_eq!(client.stats().pings_sent, 0);
        assert_eq!(client.directive(), Directive::idle());
    }

    #[test]
    fn test_urls_prefer_redirected_endpoint() {
        let (client, _tx) = test_client("http://default:8000/");

        assert_eq!(client.url(None, PING_PATH), "http://default:8000/live/v1/ping");
        assert_eq!(
            client.url(Some("https://west.example.com/"), POST_PATH),
            "https://west.example.com/live/v1/post"
        );
    }

    #[tokio::test]
    async fn test_ping_reads_directive() {
        let (base, server) = serve_once(
            "200 OK",
            vec![
                (SUBSCRIBED_HEADER, "true".to_string()),
                (REDIRECT_HEADER, "https://west.example.com".to_string()),
                (REDIRECT_TTL_HEADER, "100".to_string()),
            ],
        )
        .await;
        let (client, _tx) = test_client(&base);

        let directive = client.ping(None).await.unwrap();
        assert!(directive.is_active());
        assert_eq!(
            directive.redirect,
            Some(crate::directive::Redirect::new(
                "https://west.example.com",
                Some(Duration::from_millis(100))
            ))
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /live/v1/ping HTTP/1.1"));
        assert!(request.contains(r#""instance":"test-agent""#));
        assert_eq!(client.stats().pings_sent, 1);
    }

    #[tokio::test]
    async fn test_ping_targets_redirected_endpoint() {
        let (base, server) =
            serve_once("200 OK", vec![(SUBSCRIBED_HEADER, "false".to_string())]).await;
        // Nothing listens on the default endpoint.
        let (client, _tx) = test_client("http://127.0.0.1:1");

        let directive = client.ping(Some(&base)).await.unwrap();
        assert_eq!(directive, Directive::idle());
        assert!(server.await.unwrap().starts_with("POST /live/v1/ping"));
    }

    #[tokio::test]
    async fn test_ping_error_status() {
        let (base, _server) = serve_once("503 Service Unavailable", Vec::new()).await;
        let (client, _tx) = test_client(&base);

        let err = client.ping(None).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(client.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_start_sending_posts_prepared_batch() {
        let (base, server) =
            serve_once("200 OK", vec![(SUBSCRIBED_HEADER, "true".to_string())]).await;
        let (client, tx) = test_client("http://127.0.0.1:1");

        let batch = TelemetryBatch::new(
            vec![TelemetryItem::metric("requests.rate", 3.0)],
            "test-agent",
            Some(base.clone()),
        );
        tx.send(batch).await.unwrap();

        client.start_sending().await.unwrap();
        assert_eq!(client.directive(), Directive::active());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /live/v1/post HTTP/1.1"));
        assert!(request.contains(r#""name":"requests.rate""#));

        let stats = client.stats();
        assert_eq!(stats.batches_sent, 1);
        assert_eq!(stats.items_sent, 1);

        // Nothing left to send: a second call makes no request.
        client.start_sending().await.unwrap();
        assert_eq!(client.stats().batches_sent, 1);
    }

    #[tokio::test]
    async fn test_failed_post_keeps_previous_directive() {
        let (base, _server) = serve_once("500 Internal Server Error", Vec::new()).await;
        let (client, tx) = test_client(&base);

        tx.send(TelemetryBatch::new(Vec::new(), "test-agent", None))
            .await
            .unwrap();

        assert!(client.start_sending().await.is_err());
        assert_eq!(client.directive(), Directive::idle());

        let stats = client.stats();
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.batches_dropped, 1);
    }
}
