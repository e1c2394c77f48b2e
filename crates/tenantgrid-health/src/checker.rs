//! Health probe logic.
//!
//! [`PollTracker`] classifies the stream of runtime health answers for a
//! single unit, backing off when the runtime itself fails to answer.
//! [`http_probe`] checks plain HTTP reachability for the monitor.

use std::time::Duration;

use tracing::{debug, warn};

use tenantgrid_runtime::{ReportedHealth, RuntimeResult, UnitHealth};
use tenantgrid_state::{HealthState, UnitHealthReport};

/// Upper bound for the poll interval while the runtime keeps erroring.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Result of a single HTTP reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    /// The endpoint returned 2xx or 3xx.
    Reachable,
    /// The endpoint answered with another status.
    BadStatus(u16),
    /// Connection failed or timed out.
    Failed,
}

/// Tracks health queries for one unit until it settles.
#[derive(Debug)]
pub struct PollTracker {
    polls: u32,
    running: bool,
    consecutive_errors: u32,
    error_threshold: u32,
    last_error: Option<String>,
    base_interval: Duration,
    current_interval: Duration,
}

impl PollTracker {
    pub fn new(interval: Duration, error_threshold: u32) -> Self {
        Self {
            polls: 0,
            running: false,
            consecutive_errors: 0,
            error_threshold: error_threshold.max(1),
            last_error: None,
            base_interval: interval,
            current_interval: interval,
        }
    }

    /// Record one query result. Returns the final state once the unit has
    /// settled, `None` while it should keep being polled.
    pub fn record(&mut self, result: &RuntimeResult<UnitHealth>) -> Option<HealthState> {
        self.polls += 1;
        match result {
            Ok(health) => {
                self.consecutive_errors = 0;
                self.current_interval = self.base_interval;
                self.running = health.running;
                match health.health {
                    ReportedHealth::Healthy => Some(HealthState::Healthy),
                    ReportedHealth::Unhealthy => Some(HealthState::Unhealthy),
                    ReportedHealth::NoHealthCheck if health.running => {
                        Some(HealthState::NoHealthCheck)
                    }
                    ReportedHealth::NoHealthCheck | ReportedHealth::Starting => None,
                }
            }
            Err(e) => {
                self.consecutive_errors += 1;
                self.last_error = Some(e.to_string());
                self.current_interval = (self.current_interval * 2).min(MAX_BACKOFF);
                if self.consecutive_errors >= self.error_threshold {
                    warn!(
                        errors = self.consecutive_errors,
                        threshold = self.error_threshold,
                        error = %e,
                        "runtime keeps failing health queries"
                    );
                    Some(HealthState::Unhealthy)
                } else {
                    debug!(errors = self.consecutive_errors, error = %e, "health query failed");
                    None
                }
            }
        }
    }

    /// Delay before the next query.
    pub fn next_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn report(&self, state: HealthState) -> UnitHealthReport {
        UnitHealthReport {
            state,
            running: self.running,
            polls: self.polls,
            last_error: self.last_error.clone(),
        }
    }
}

/// Perform an HTTP GET against `address` + `path`.
///
/// `host` overrides the `Host` header, for probing a virtual host behind a
/// reverse proxy by its listen address.
pub async fn http_probe(
    address: &str,
    path: &str,
    host: Option<&str>,
    timeout: Duration,
) -> ProbeResult {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", host.unwrap_or(address))
            .header("user-agent", "tenantgrid-monitor/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    ProbeResult::Reachable
                } else {
                    debug!(%status, %uri, "probe returned error status");
                    ProbeResult::BadStatus(status.as_u16())
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantgrid_runtime::RuntimeError;

    fn ok(health: ReportedHealth, running: bool) -> RuntimeResult<UnitHealth> {
        Ok(UnitHealth { health, running })
    }

    fn err() -> RuntimeResult<UnitHealth> {
        Err(RuntimeError::Unavailable("docker".into()))
    }

    #[test]
    fn healthy_settles_immediately() {
        let mut t = PollTracker::new(Duration::from_secs(5), 3);
        assert_eq!(t.record(&ok(ReportedHealth::Healthy, true)), Some(HealthState::Healthy));
        assert_eq!(t.polls(), 1);
    }

    #[test]
    fn starting_keeps_polling() {
        let mut t = PollTracker::new(Duration::from_secs(5), 3);
        assert_eq!(t.record(&ok(ReportedHealth::Starting, true)), None);
        assert_eq!(t.record(&ok(ReportedHealth::Unhealthy, true)), Some(HealthState::Unhealthy));
        let report = t.report(HealthState::Unhealthy);
        assert_eq!(report.polls, 2);
        assert!(report.running);
    }

    #[test]
    fn no_health_check_needs_running() {
        let mut t = PollTracker::new(Duration::from_secs(5), 3);
        assert_eq!(t.record(&ok(ReportedHealth::NoHealthCheck, false)), None);
        assert_eq!(
            t.record(&ok(ReportedHealth::NoHealthCheck, true)),
            Some(HealthState::NoHealthCheck)
        );
    }

    #[test]
    fn query_errors_back_off_then_settle_unhealthy() {
        let mut t = PollTracker::new(Duration::from_secs(1), 3);
        assert_eq!(t.record(&err()), None);
        assert_eq!(t.next_interval(), Duration::from_secs(2));
        assert_eq!(t.record(&err()), None);
        assert_eq!(t.next_interval(), Duration::from_secs(4));
        assert_eq!(t.record(&err()), Some(HealthState::Unhealthy));
        assert!(t.report(HealthState::Unhealthy).last_error.is_some());
    }

    #[test]
    fn successful_query_resets_backoff() {
        let mut t = PollTracker::new(Duration::from_secs(1), 5);
        t.record(&err());
        t.record(&err());
        assert_eq!(t.next_interval(), Duration::from_secs(4));
        t.record(&ok(ReportedHealth::Starting, true));
        assert_eq!(t.next_interval(), Duration::from_secs(1));
        t.record(&err());
        t.record(&err());
        // Counter restarted after the good answer.
        assert_eq!(t.record(&ok(ReportedHealth::Starting, true)), None);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut t = PollTracker::new(Duration::from_secs(1), 100);
        for _ in 0..10 {
            t.record(&err());
        }
        assert_eq!(t.next_interval(), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn probe_to_closed_port_fails() {
        let result = http_probe("127.0.0.1:1", "/", None, Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }
}
