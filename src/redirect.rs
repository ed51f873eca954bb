//! Endpoint override with a validity window.
//!
//! Holds at most one redirected endpoint. Expiry is checked lazily whenever
//! the coordinator asks for the current endpoint, so no timer is needed.

use tokio::time::Instant;
use tracing::{debug, info};

use crate::directive::Directive;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveRedirect {
    endpoint: String,
    expires_at: Option<Instant>,
}

/// The endpoint the coordinator currently targets, if not the default.
#[derive(Debug, Default)]
pub struct RedirectState {
    active: Option<ActiveRedirect>,
}

impl RedirectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the redirect carried by `directive`, if any.
    ///
    /// Returns `true` when a redirect was applied. A directive without a
    /// redirect leaves the current override untouched.
    pub fn apply(&mut self, directive: &Directive, received_at: Instant) -> bool {
        let Some(redirect) = &directive.redirect else {
            return false;
        };

        let expires_at = redirect.valid_for.map(|ttl| received_at + ttl);
        let next = ActiveRedirect {
            endpoint: redirect.endpoint.clone(),
            expires_at,
        };

        if self.active.as_ref().map(|a| &a.endpoint) != Some(&next.endpoint) {
            info!(
                endpoint = %next.endpoint,
                valid_for_ms = redirect.valid_for.map(|ttl| ttl.as_millis() as u64),
                "Endpoint redirected"
            );
        } else {
            debug!(endpoint = %next.endpoint, "Endpoint redirect renewed");
        }

        self.active = Some(next);
        true
    }

    /// The endpoint to target at `now`, or `None` for the default.
    ///
    /// An expired override is dropped here.
    pub fn endpoint(&mut self, now: Instant) -> Option<String> {
        let expired = matches!(
            &self.active,
            Some(ActiveRedirect { expires_at: Some(at), .. }) if now >= *at
        );

        if expired {
            if let Some(previous) = self.active.take() {
                info!(
                    endpoint = %previous.endpoint,
                    "Endpoint redirect expired, reverting to default"
                );
            }
        }

        self.active.as_ref().map(|a| a.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_on_default() {
        let mut state = RedirectState::new();
        assert_eq!(state.endpoint(Instant::now()), None);
    }

    #[test]
    fn test_directive_without_redirect_keeps_override() {
        let now = Instant::now();
        let mut state = RedirectState::new();

        assert!(state.apply(&Directive::idle().with_redirect("http://a", None), now));
        assert!(!state.apply(&Directive::active(), now));
        assert_eq!(state.endpoint(now), Some("http://a".to_string()));
    }

    #[test]
    fn test_redirect_expires_after_exactly_its_window() {
        let received = Instant::now();
        let mut state = RedirectState::new();
        state.apply(
            &Directive::active().with_redirect("http://a", Some(Duration::from_millis(100))),
            received,
        );

        assert_eq!(
            state.endpoint(received + Duration::from_millis(99)),
            Some("http://a".to_string())
        );
        assert_eq!(state.endpoint(received + Duration::from_millis(100)), None);

        // Once dropped it does not come back.
        assert_eq!(state.endpoint(received + Duration::from_millis(50)), None);
    }

    #[test]
    fn test_renewal_extends_window() {
        let start = Instant::now();
        let ttl = Some(Duration::from_millis(100));
        let mut state = RedirectState::new();

        state.apply(&Directive::active().with_redirect("http://a", ttl), start);
        state.apply(
            &Directive::active().with_redirect("http://a", ttl),
            start + Duration::from_millis(80),
        );

        assert_eq!(
            state.endpoint(start + Duration::from_millis(150)),
            Some("http://a".to_string())
        );
        assert_eq!(state.endpoint(start + Duration::from_millis(180)), None);
    }

    #[test]
    fn test_newer_redirect_replaces_older() {
        let now = Instant::now();
        let mut state = RedirectState::new();

        state.apply(&Directive::idle().with_redirect("http://a", None), now);
        state.apply(
            &Directive::idle().with_redirect("http://b", Some(Duration::from_secs(1))),
            now,
        );

        assert_eq!(state.endpoint(now), Some("http://b".to_string()));
        assert_eq!(state.endpoint(now + Duration::from_secs(1)), None);
    }
}
