//! Push-notification client guarded by a circuit breaker.
//!
//! Sends plain-text POSTs to an ntfy-style endpoint. Delivery is
//! fire-and-forget: the cycle spawns a send task and never waits on it, so the
//! only shared state touched from multiple tasks is the breaker behind its
//! mutex.
//!
//! Breaker semantics:
//! - opens after [`OPEN_THRESHOLD`] consecutive definitive failures; while
//!   open, sends are rejected without touching the network;
//! - a send attempted more than [`HALF_OPEN_AFTER`] past the last failure
//!   optimistically closes the breaker and lets the probe through;
//! - any recorded success resets the failure streak and closes the breaker.
//!
//! Each send additionally runs its own small retry loop (exponential backoff,
//! ±25% jitter, capped) with per-error classification: auth and other client
//! errors abort immediately, rate limiting and server/transport failures are
//! retried.

use crate::clock::{Clock, MonotonicClock};
use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Consecutive failures required to open the circuit.
pub const OPEN_THRESHOLD: u32 = 5;
/// Cooldown after which an open circuit allows a probe send.
pub const HALF_OPEN_AFTER: Duration = Duration::from_secs(30);

/// Pause between messages in individual mode, to avoid bursting the endpoint.
const INTER_MESSAGE_DELAY: Duration = Duration::from_millis(100);
/// Batch digests list at most this many items before the "+N more" suffix.
const MAX_LISTED_ITEMS: usize = 10;

/// Notification failure, classified for the per-send retry loop.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("authentication rejected (status {status})")]
    Auth { status: u16 },
    #[error("client error (status {status})")]
    Client { status: u16 },
    #[error("rate limited")]
    RateLimited,
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("notification failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<NotifyError>,
    },
    #[error("cancelled")]
    Cancelled,
}

impl NotifyError {
    /// Whether the per-send retry loop should keep going.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            NotifyError::RateLimited
                | NotifyError::Server { .. }
                | NotifyError::Network(_)
                | NotifyError::Timeout
        )
    }
}

/// Map an HTTP error status onto the notification taxonomy.
///
/// 401/403 are auth failures, 429 is rate limiting, remaining 4xx are client
/// errors; everything at 500 and above (including statuses we have no name
/// for) is treated as a retryable server failure.
pub fn classify_status(status: u16) -> NotifyError {
    match status {
        401 | 403 => NotifyError::Auth { status },
        429 => NotifyError::RateLimited,
        400..=499 => NotifyError::Client { status },
        _ => NotifyError::Server { status },
    }
}

/// One newly appended work item, as rendered into notifications.
#[derive(Debug, Clone)]
pub struct ItemInfo {
    pub item_name: String,
    pub user_name: String,
    pub crime_url: String,
}

/// Static notification tuning, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub base_url: String,
    pub topic: String,
    pub batch_mode: bool,
    pub priority: String,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Transport seam so the breaker and retry loop are testable without a server.
#[async_trait]
pub trait PushTransport: Send + Sync + std::fmt::Debug {
    /// POST `body` and return the HTTP status code.
    async fn post(&self, url: &str, priority: Option<&str>, body: &str)
        -> Result<u16, NotifyError>;
}

/// Production transport over reqwest.
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("default http client");
        Self { http }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        priority: Option<&str>,
        body: &str,
    ) -> Result<u16, NotifyError> {
        let mut request =
            self.http.post(url).header("Content-Type", "text/plain").body(body.to_owned());
        if let Some(priority) = priority {
            request = request.header("Priority", priority.to_owned());
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout
            } else {
                NotifyError::Network(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    circuit_open: bool,
    last_failure_at: Option<u64>,
    total_sent: u64,
    total_failed: u64,
    total_retries: u64,
}

/// Snapshot of the delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyMetrics {
    pub sent: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Notification client; lives for the process lifetime behind an `Arc` so
/// spawned send tasks can share the breaker.
#[derive(Debug)]
pub struct NotifyClient {
    transport: Arc<dyn PushTransport>,
    clock: Arc<dyn Clock>,
    config: NotifyConfig,
    breaker: Mutex<BreakerState>,
}

impl NotifyClient {
    pub fn new(config: NotifyConfig) -> Self {
        Self::with_parts(config, Arc::new(HttpTransport::new()), Arc::new(MonotonicClock::default()))
    }

    /// Build with an injected transport and clock (used by tests).
    pub fn with_parts(
        config: NotifyConfig,
        transport: Arc<dyn PushTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { transport, clock, config, breaker: Mutex::new(BreakerState::default()) }
    }

    /// Send one message through the breaker and the per-send retry loop.
    pub async fn send(&self, token: &CancellationToken, message: &str) -> Result<(), NotifyError> {
        if !self.config.enabled {
            tracing::debug!("notifications disabled, skipping");
            return Ok(());
        }

        if self.circuit_is_open() {
            tracing::warn!("circuit breaker open, skipping notification");
            return Err(NotifyError::CircuitOpen);
        }

        let mut last_err: Option<NotifyError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = notification_backoff(
                    attempt,
                    self.config.base_delay,
                    self.config.max_delay,
                );
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying notification after delay"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(NotifyError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                self.breaker.lock().unwrap().total_retries += 1;
            }

            match self.post_once(message, attempt + 1).await {
                Ok(()) => {
                    self.record_success();
                    return Ok(());
                }
                Err(err) if !err.retryable() => {
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        "non-retryable notification error, giving up"
                    );
                    self.record_failure();
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        "notification attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        self.record_failure();
        let source = last_err.unwrap_or(NotifyError::Network("no attempt recorded".into()));
        Err(NotifyError::RetriesExhausted {
            attempts: self.config.max_retries + 1,
            source: Box::new(source),
        })
    }

    async fn post_once(&self, message: &str, attempt: u32) -> Result<(), NotifyError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), self.config.topic);
        tracing::debug!(url = %url, attempt, "sending notification");

        let priority =
            if self.config.priority.is_empty() { None } else { Some(self.config.priority.as_str()) };
        let status = self.transport.post(&url, priority, message).await?;
        if status >= 400 {
            return Err(classify_status(status));
        }

        tracing::debug!(status, attempt, "notification sent");
        Ok(())
    }

    /// Fire-and-forget dispatch for the newly appended items. Never blocks the
    /// calling cycle; failures surface only as log lines.
    pub fn notify_new_items(self: Arc<Self>, token: &CancellationToken, items: &[ItemInfo]) {
        if !self.config.enabled || items.is_empty() {
            return;
        }

        if self.config.batch_mode {
            tracing::info!(items_added = items.len(), "sending batch notification for new items");
            self.spawn_send(token, format_batch_message(items));
        } else {
            tracing::info!(
                items_added = items.len(),
                "sending individual notifications for new items"
            );
            let token = token.clone();
            let messages: Vec<String> = items
                .iter()
                .enumerate()
                .map(|(i, item)| format_individual_message(item, i + 1, items.len()))
                .collect();
            tokio::spawn(async move {
                let last = messages.len().saturating_sub(1);
                for (i, message) in messages.into_iter().enumerate() {
                    Arc::clone(&self).spawn_send(&token, message);
                    if i < last {
                        tokio::time::sleep(INTER_MESSAGE_DELAY).await;
                    }
                }
            });
        }
    }

    fn spawn_send(self: Arc<Self>, token: &CancellationToken, message: String) {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(err) = self.send(&token, &message).await {
                tracing::warn!(error = %err, "async notification failed");
            }
        });
    }

    /// Check the breaker, transitioning open → closed when the cooldown has
    /// passed so the current send acts as the half-open probe.
    fn circuit_is_open(&self) -> bool {
        let mut breaker = self.breaker.lock().unwrap();
        if !breaker.circuit_open {
            return false;
        }

        let cooled = breaker.last_failure_at.is_some_and(|at| {
            let elapsed = self.clock.now_millis().saturating_sub(at);
            elapsed > HALF_OPEN_AFTER.as_millis() as u64
        });
        if cooled {
            breaker.circuit_open = false;
            breaker.consecutive_failures = 0;
            tracing::info!("circuit breaker cooldown elapsed, allowing probe send");
        }

        breaker.circuit_open
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock().unwrap();
        breaker.total_sent += 1;
        breaker.consecutive_failures = 0;
        if breaker.circuit_open {
            breaker.circuit_open = false;
            tracing::info!("circuit breaker closed after successful notification");
        }
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock().unwrap();
        breaker.total_failed += 1;
        breaker.consecutive_failures += 1;
        breaker.last_failure_at = Some(self.clock.now_millis());

        if breaker.consecutive_failures >= OPEN_THRESHOLD && !breaker.circuit_open {
            breaker.circuit_open = true;
            tracing::warn!(
                failures = breaker.consecutive_failures,
                "circuit breaker opened after consecutive failures"
            );
        }
    }

    /// Snapshot of the delivery counters.
    pub fn metrics(&self) -> NotifyMetrics {
        let breaker = self.breaker.lock().unwrap();
        NotifyMetrics {
            sent: breaker.total_sent,
            failed: breaker.total_failed,
            retries: breaker.total_retries,
        }
    }
}

/// Backoff for the per-send retry loop: doubling from `base`, ±25% jitter,
/// capped at `max`. `attempt` is 1-based here (the first retry).
fn notification_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    notification_backoff_with_rng(attempt, base, max, &mut rand::rng())
}

fn notification_backoff_with_rng<R: Rng>(
    attempt: u32,
    base: Duration,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    let backoff = base.checked_mul(1u32 << exponent).unwrap_or(max);
    let jitter: f64 = rng.random_range(-0.25..0.25);
    backoff.mul_f64(1.0 + jitter).min(max)
}

/// One digest message for a batch of new items.
pub fn format_batch_message(items: &[ItemInfo]) -> String {
    let mut out = String::new();
    if items.len() == 1 {
        out.push_str("🎯 Torn OC: 1 new item needed\n");
    } else {
        out.push_str(&format!("🎯 Torn OC: {} new items needed\n", items.len()));
    }

    for item in items.iter().take(MAX_LISTED_ITEMS) {
        out.push_str(&format!("• {} for {}\n", item.item_name, item.user_name));
    }

    if items.len() > MAX_LISTED_ITEMS {
        out.push_str(&format!("... and {} more items\n", items.len() - MAX_LISTED_ITEMS));
    }

    out.trim_end_matches('\n').to_string()
}

/// One message per item, with a position counter when part of a batch.
pub fn format_individual_message(item: &ItemInfo, item_num: usize, total: usize) -> String {
    let mut out = String::new();
    if total > 1 {
        out.push_str(&format!("📋 New item needed ({}/{})\n", item_num, total));
    } else {
        out.push_str("📋 New item needed\n");
    }

    out.push_str(&format!("🎯 **{}**\n", item.item_name));
    out.push_str(&format!("👤 For: {}\n", item.user_name));

    if !item.crime_url.is_empty() {
        out.push_str(&format!("🔗 Crime: {}\n", item.crime_url));
    }

    out.trim_end_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ManualClock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that replays a scripted sequence of statuses/errors and
    /// counts how often it is hit. An exhausted script keeps answering 200.
    #[derive(Debug, Default)]
    struct ScriptTransport {
        script: Mutex<VecDeque<Result<u16, NotifyError>>>,
        calls: AtomicUsize,
    }

    impl ScriptTransport {
        fn new(script: Vec<Result<u16, NotifyError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushTransport for ScriptTransport {
        async fn post(
            &self,
            _url: &str,
            _priority: Option<&str>,
            _body: &str,
        ) -> Result<u16, NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(200))
        }
    }

    fn test_config(max_retries: u32) -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            base_url: "https://ntfy.test".into(),
            topic: "supply".into(),
            batch_mode: true,
            priority: "default".into(),
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn client_with(
        max_retries: u32,
        transport: Arc<ScriptTransport>,
        clock: ManualClock,
    ) -> NotifyClient {
        NotifyClient::with_parts(test_config(max_retries), transport, Arc::new(clock))
    }

    fn item(name: &str, user: &str) -> ItemInfo {
        ItemInfo {
            item_name: name.into(),
            user_name: user.into(),
            crime_url: "http://www.torn.com/factions.php?step=your#/tab=crimes&crimeId=5".into(),
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_exactly_five_consecutive_failures() {
        let transport = ScriptTransport::new((0..16).map(|_| Ok(500)).collect());
        let client = client_with(0, transport.clone(), ManualClock::new());
        let token = CancellationToken::new();

        for i in 0..5 {
            let err = client.send(&token, "msg").await.unwrap_err();
            assert!(!matches!(err, NotifyError::CircuitOpen), "breaker open too early at {}", i);
        }
        assert_eq!(transport.calls(), 5);

        let err = client.send(&token, "msg").await.unwrap_err();
        assert!(matches!(err, NotifyError::CircuitOpen));
        assert_eq!(transport.calls(), 5, "open circuit must not touch the network");
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let transport = ScriptTransport::new(vec![
            Ok(500),
            Ok(500),
            Ok(500),
            Ok(200),
            Ok(500),
            Ok(500),
            Ok(500),
            Ok(500),
        ]);
        let client = client_with(0, transport.clone(), ManualClock::new());
        let token = CancellationToken::new();

        for _ in 0..3 {
            let _ = client.send(&token, "msg").await;
        }
        client.send(&token, "msg").await.expect("scripted success");

        // Four more failures: streak restarted, so the breaker must stay shut.
        for _ in 0..4 {
            let err = client.send(&token, "msg").await.unwrap_err();
            assert!(matches!(err, NotifyError::Server { .. }));
        }
        assert_eq!(transport.calls(), 8);

        let metrics = client.metrics();
        assert_eq!(metrics.sent, 1);
        assert_eq!(metrics.failed, 7);
    }

    #[tokio::test]
    async fn open_circuit_allows_probe_after_cooldown() {
        let mut script: Vec<Result<u16, NotifyError>> = (0..5).map(|_| Ok(500)).collect();
        script.push(Ok(200));
        let transport = ScriptTransport::new(script);
        let clock = ManualClock::new();
        let client = client_with(0, transport.clone(), clock.clone());
        let token = CancellationToken::new();

        for _ in 0..5 {
            let _ = client.send(&token, "msg").await;
        }
        assert!(matches!(client.send(&token, "msg").await.unwrap_err(), NotifyError::CircuitOpen));

        clock.advance(HALF_OPEN_AFTER.as_millis() as u64 + 1);
        client.send(&token, "probe").await.expect("probe goes through after cooldown");
        assert_eq!(transport.calls(), 6);

        // Breaker closed by the success; further sends proceed normally.
        client.send(&token, "msg").await.expect("closed again");
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_without_retries() {
        let transport = ScriptTransport::new(vec![Ok(403)]);
        let client = client_with(3, transport.clone(), ManualClock::new());
        let token = CancellationToken::new();

        let err = client.send(&token, "msg").await.unwrap_err();
        assert!(matches!(err, NotifyError::Auth { status: 403 }));
        assert_eq!(transport.calls(), 1, "auth failures must not be retried");
        assert_eq!(client.metrics().failed, 1);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let transport = ScriptTransport::new(vec![
            Ok(503),
            Err(NotifyError::Network("connection reset".into())),
            Ok(200),
        ]);
        let client = client_with(3, transport.clone(), ManualClock::new());
        let token = CancellationToken::new();

        client.send(&token, "msg").await.expect("third attempt succeeds");
        assert_eq!(transport.calls(), 3);

        let metrics = client.metrics();
        assert_eq!(metrics.sent, 1);
        assert_eq!(metrics.retries, 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_cause() {
        let transport = ScriptTransport::new((0..3).map(|_| Ok(429)).collect());
        let client = client_with(2, transport.clone(), ManualClock::new());
        let token = CancellationToken::new();

        let err = client.send(&token, "msg").await.unwrap_err();
        match err {
            NotifyError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, NotifyError::RateLimited));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn disabled_client_never_touches_the_network() {
        let transport = ScriptTransport::new(vec![]);
        let mut config = test_config(0);
        config.enabled = false;
        let client = NotifyClient::with_parts(
            config,
            transport.clone(),
            Arc::new(ManualClock::new()),
        );

        client.send(&CancellationToken::new(), "msg").await.expect("disabled send is a no-op");
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn status_classification_covers_the_taxonomy() {
        assert!(matches!(classify_status(401), NotifyError::Auth { .. }));
        assert!(matches!(classify_status(403), NotifyError::Auth { .. }));
        assert!(matches!(classify_status(429), NotifyError::RateLimited));
        assert!(matches!(classify_status(404), NotifyError::Client { .. }));
        assert!(matches!(classify_status(500), NotifyError::Server { .. }));
        assert!(matches!(classify_status(599), NotifyError::Server { .. }));

        assert!(!classify_status(403).retryable());
        assert!(!classify_status(404).retryable());
        assert!(classify_status(429).retryable());
        assert!(classify_status(502).retryable());
    }

    #[test]
    fn backoff_respects_jitter_band_and_cap() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        let mut rng = StdRng::seed_from_u64(11);

        for attempt in 1..12u32 {
            let raw = base.checked_mul(1 << (attempt - 1).min(30)).unwrap_or(max);
            let delay = notification_backoff_with_rng(attempt, base, max, &mut rng);
            assert!(delay >= raw.mul_f64(0.75).min(max), "attempt {}: below band", attempt);
            assert!(delay <= max, "attempt {}: above cap", attempt);
        }
    }

    #[test]
    fn batch_message_lists_at_most_ten_items() {
        let items: Vec<ItemInfo> =
            (0..12).map(|i| item(&format!("Item {}", i), &format!("User {}", i))).collect();
        let message = format_batch_message(&items);

        assert!(message.starts_with("🎯 Torn OC: 12 new items needed"));
        assert_eq!(message.matches('•').count(), 10);
        assert!(message.ends_with("... and 2 more items"));
    }

    #[test]
    fn batch_message_uses_singular_for_one_item() {
        let message = format_batch_message(&[item("Lockpick", "Alice")]);
        assert!(message.starts_with("🎯 Torn OC: 1 new item needed"));
        assert!(message.contains("• Lockpick for Alice"));
    }

    #[test]
    fn individual_message_carries_counter_and_link() {
        let message = format_individual_message(&item("Lockpick", "Alice"), 2, 3);
        assert!(message.starts_with("📋 New item needed (2/3)"));
        assert!(message.contains("**Lockpick**"));
        assert!(message.contains("For: Alice"));
        assert!(message.contains("🔗 Crime: http://www.torn.com/"));

        let single = format_individual_message(&item("Lockpick", "Alice"), 1, 1);
        assert!(single.starts_with("📋 New item needed\n"));
    }
}
