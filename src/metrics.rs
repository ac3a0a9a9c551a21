use std::fmt;
use std::sync::Arc;

use hyper::StatusCode;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const METRICS_PREFIX: &str = "notes_api";

struct Metrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    signups: IntCounter,
    sessions_created: IntCounter,
    sessions_renewed: IntCounter,
    sessions_invalidated: IntCounter,
    http_responses: IntCounterVec,
}

/// Prometheus metrics for the API, cheap to clone into every handler
#[derive(Clone)]
pub struct SharedMetrics {
    inner: Arc<Metrics>,
}

impl fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMetrics").finish_non_exhaustive()
    }
}

impl SharedMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(METRICS_PREFIX.to_string()), None)?;

        let login_attempts = IntCounterVec::new(
            Opts::new("login_attempts_total", "Sign-in attempts by result"),
            &["result"],
        )?;
        let signups = IntCounter::new("signups_total", "Accounts created")?;
        let sessions_created = IntCounter::new("sessions_created_total", "Sessions issued")?;
        let sessions_renewed =
            IntCounter::new("sessions_renewed_total", "Sessions extended during validation")?;
        let sessions_invalidated =
            IntCounter::new("sessions_invalidated_total", "Sessions removed by sign-out")?;
        let http_responses = IntCounterVec::new(
            Opts::new("http_responses_total", "HTTP responses by status class"),
            &["class"],
        )?;

        registry.register(Box::new(login_attempts.clone()))?;
        registry.register(Box::new(signups.clone()))?;
        registry.register(Box::new(sessions_created.clone()))?;
        registry.register(Box::new(sessions_renewed.clone()))?;
        registry.register(Box::new(sessions_invalidated.clone()))?;
        registry.register(Box::new(http_responses.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            inner: Arc::new(Metrics {
                registry,
                login_attempts,
                signups,
                sessions_created,
                sessions_renewed,
                sessions_invalidated,
                http_responses,
            }),
        })
    }

    pub fn record_login_attempt(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.inner.login_attempts.with_label_values(&[result]).inc();
    }

    pub fn record_signup(&self) {
        self.inner.signups.inc();
    }

    pub fn record_session_created(&self) {
        self.inner.sessions_created.inc();
    }

    pub fn record_session_renewed(&self) {
        self.inner.sessions_renewed.inc();
    }

    pub fn record_sessions_invalidated(&self, count: usize) {
        self.inner
            .sessions_invalidated
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    pub fn record_response(&self, status: StatusCode) {
        let class = match status.as_u16() {
            100..=199 => "1xx",
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            _ => "5xx",
        };
        self.inner.http_responses.with_label_values(&[class]).inc();
    }

    /// Renders all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let metrics = SharedMetrics::new().unwrap();
        metrics.record_signup();
        metrics.record_login_attempt(true);
        metrics.record_login_attempt(false);
        metrics.record_login_attempt(false);
        metrics.record_sessions_invalidated(3);
        metrics.record_response(StatusCode::UNAUTHORIZED);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("notes_api_signups_total 1"));
        assert!(text.contains("notes_api_login_attempts_total{result=\"failure\"} 2"));
        assert!(text.contains("notes_api_sessions_invalidated_total 3"));
        assert!(text.contains("notes_api_http_responses_total{class=\"4xx\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let first = SharedMetrics::new().unwrap();
        let second = SharedMetrics::new().unwrap();
        first.record_signup();

        let text = String::from_utf8(second.encode().unwrap()).unwrap();
        assert!(text.contains("notes_api_signups_total 0"));
    }
}
