//! Directive model for the live metrics service.
//!
//! Every ping response and every post response carries a directive: whether
//! the service currently wants telemetry streamed (subscribed), an optional
//! temporary endpoint redirect, and an optional polling interval hint.
//! The directive travels in response headers.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Url;
use tracing::warn;

/// Header carrying the subscription flag (`true` / `false`).
pub const SUBSCRIBED_HEADER: &str = "x-live-metrics-subscribed";

/// Header carrying an absolute URL that replaces the default endpoint.
pub const REDIRECT_HEADER: &str = "x-live-metrics-endpoint-redirect";

/// Header carrying how long the redirect stays valid, in milliseconds.
pub const REDIRECT_TTL_HEADER: &str = "x-live-metrics-redirect-ttl-ms";

/// Header carrying the preferred wait between pings, in milliseconds.
pub const POLLING_HINT_HEADER: &str = "x-live-metrics-polling-interval-hint-ms";

/// Whether the service wants telemetry streamed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceStatus {
    /// Someone is watching: stream telemetry.
    Active,
    /// Nobody is watching: keep pinging.
    #[default]
    Idle,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Active => write!(f, "active"),
            ServiceStatus::Idle => write!(f, "idle"),
        }
    }
}

/// A temporary override of the endpoint all calls should target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Base URL to use instead of the default endpoint
    pub endpoint: String,

    /// How long the redirect stays in effect after it is received.
    /// `None` keeps it until another redirect supersedes it.
    pub valid_for: Option<Duration>,
}

impl Redirect {
    pub fn new(endpoint: impl Into<String>, valid_for: Option<Duration>) -> Self {
        Self {
            endpoint: endpoint.into(),
            valid_for,
        }
    }
}

/// The service's instruction at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directive {
    pub status: ServiceStatus,
    pub redirect: Option<Redirect>,
    pub polling_interval_hint: Option<Duration>,
}

impl Directive {
    /// IDLE with no redirect and no hint.
    pub fn idle() -> Self {
        Self::default()
    }

    /// ACTIVE with no redirect and no hint.
    pub fn active() -> Self {
        Self {
            status: ServiceStatus::Active,
            ..Self::default()
        }
    }

    pub fn with_redirect(
        mut self,
        endpoint: impl Into<String>,
        valid_for: Option<Duration>,
    ) -> Self {
        self.redirect = Some(Redirect::new(endpoint, valid_for));
        self
    }

    pub fn with_polling_hint(mut self, hint: Duration) -> Self {
        self.polling_interval_hint = Some(hint);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    /// Read a directive from response headers.
    ///
    /// A missing or malformed directive is treated as IDLE with no redirect.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        match Self::parse_headers(headers) {
            Ok(directive) => directive,
            Err(e) => {
                warn!(error = %e, "Malformed directive in response, treating as idle");
                Self::idle()
            }
        }
    }

    fn parse_headers(headers: &HeaderMap) -> Result<Self, DirectiveError> {
        let status = match header_str(headers, SUBSCRIBED_HEADER)? {
            Some(value) if value.eq_ignore_ascii_case("true") => ServiceStatus::Active,
            Some(value) if value.eq_ignore_ascii_case("false") => ServiceStatus::Idle,
            Some(value) => {
                return Err(DirectiveError::InvalidValue {
                    header: SUBSCRIBED_HEADER,
                    value: value.to_string(),
                })
            }
            None => return Err(DirectiveError::Missing(SUBSCRIBED_HEADER)),
        };

        let redirect = match header_str(headers, REDIRECT_HEADER)? {
            Some(value) => {
                let endpoint = parse_endpoint(value)?;
                let valid_for = header_millis(headers, REDIRECT_TTL_HEADER)?;
                Some(Redirect::new(endpoint, valid_for))
            }
            None => None,
        };

        let polling_interval_hint =
            header_millis(headers, POLLING_HINT_HEADER)?.filter(|hint| !hint.is_zero());

        Ok(Self {
            status,
            redirect,
            polling_interval_hint,
        })
    }
}

/// Reasons a directive could not be read from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    /// A required header is absent
    Missing(&'static str),

    /// A header is present but its value cannot be used
    InvalidValue { header: &'static str, value: String },
}

impl std::fmt::Display for DirectiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectiveError::Missing(header) => write!(f, "missing header {}", header),
            DirectiveError::InvalidValue { header, value } => {
                write!(f, "invalid value '{}' for header {}", value, header)
            }
        }
    }
}

impl std::error::Error for DirectiveError {}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, DirectiveError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| DirectiveError::InvalidValue {
                header: name,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            }),
        None => Ok(None),
    }
}

fn header_millis(
    headers: &HeaderMap,
    name: &'static str,
) -> Result<Option<Duration>, DirectiveError> {
    match header_str(headers, name)? {
        Some(value) => value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| DirectiveError::InvalidValue {
                header: name,
                value: value.to_string(),
            }),
        None => Ok(None),
    }
}

/// Redirects must be absolute http(s) URLs; the trailing slash is dropped so
/// request paths can be appended uniformly.
fn parse_endpoint(value: &str) -> Result<String, DirectiveError> {
    let invalid = || DirectiveError::InvalidValue {
        header: REDIRECT_HEADER,
        value: value.to_string(),
    };

    let url = Url::parse(value).map_err(|_| invalid())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid());
    }

    Ok(value.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_default_directive_is_idle() {
        let directive = Directive::default();
        assert_eq!(directive.status, ServiceStatus::Idle);
        assert!(directive.redirect.is_none());
        assert!(directive.polling_interval_hint.is_none());
        assert!(!directive.is_active());
    }

    #[test]
    fn test_subscribed_header() {
        let directive = Directive::from_headers(&headers(&[(SUBSCRIBED_HEADER, "true")]));
        assert_eq!(directive, Directive::active());

        let directive = Directive::from_headers(&headers(&[(SUBSCRIBED_HEADER, "FALSE")]));
        assert_eq!(directive, Directive::idle());
    }

    #[test]
    fn test_full_directive() {
        let directive = Directive::from_headers(&headers(&[
            (SUBSCRIBED_HEADER, "true"),
            (REDIRECT_HEADER, "https://west.live.example.com/"),
            (REDIRECT_TTL_HEADER, "100"),
            (POLLING_HINT_HEADER, "2500"),
        ]));

        assert!(directive.is_active());
        assert_eq!(
            directive.redirect,
            Some(Redirect::new(
                "https://west.live.example.com",
                Some(Duration::from_millis(100))
            ))
        );
        assert_eq!(directive.polling_interval_hint, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_redirect_without_ttl_never_expires() {
        let directive = Directive::from_headers(&headers(&[
            (SUBSCRIBED_HEADER, "false"),
            (REDIRECT_HEADER, "http://other:9000"),
        ]));

        assert_eq!(directive.status, ServiceStatus::Idle);
        assert_eq!(directive.redirect, Some(Redirect::new("http://other:9000", None)));
    }

    #[test]
    fn test_zero_polling_hint_is_ignored() {
        let directive = Directive::from_headers(&headers(&[
            (SUBSCRIBED_HEADER, "false"),
            (POLLING_HINT_HEADER, "0"),
        ]));
        assert!(directive.polling_interval_hint.is_none());
    }

    #[test]
    fn test_missing_status_is_idle() {
        let directive =
            Directive::from_headers(&headers(&[(REDIRECT_HEADER, "http://other:9000")]));
        assert_eq!(directive, Directive::idle());
    }

    #[test]
    fn test_malformed_directives_fall_back_to_idle() {
        let cases: Vec<Vec<(&'static str, &str)>> = vec![
            vec![(SUBSCRIBED_HEADER, "maybe")],
            vec![(SUBSCRIBED_HEADER, "true"), (REDIRECT_HEADER, "not a url")],
            vec![(SUBSCRIBED_HEADER, "true"), (REDIRECT_HEADER, "ftp://files.example.com")],
            vec![
                (SUBSCRIBED_HEADER, "true"),
                (REDIRECT_HEADER, "http://other:9000"),
                (REDIRECT_TTL_HEADER, "-5"),
            ],
            vec![(SUBSCRIBED_HEADER, "true"), (POLLING_HINT_HEADER, "soon")],
        ];

        for case in cases {
            let directive = Directive::from_headers(&headers(&case));
            assert_eq!(directive, Directive::idle(), "case {:?}", case);
        }
    }

    #[test]
    fn test_directive_error_display() {
        assert_eq!(
            DirectiveError::Missing(SUBSCRIBED_HEADER).to_string(),
            "missing header x-live-metrics-subscribed"
        );

        let err = DirectiveError::InvalidValue {
            header: REDIRECT_TTL_HEADER,
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains(REDIRECT_TTL_HEADER));
    }
}
