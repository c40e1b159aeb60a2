use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowdeck_core::{JwtManager, Settings};
use flowdeck_store::Store;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::realtime::Hub;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: Arc<Hub>,
    pub jwt: Arc<JwtManager>,
    pub settings: Arc<Settings>,
    pub login_limiter: Arc<LoginLimiter>,
    pub ws_metrics: Arc<WebSocketMetrics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(settings: Settings, store: Store) -> Self {
        let jwt = JwtManager::new(settings.auth.secret_or_dev(), settings.auth.jwt_expiry_hours);
        let login_limiter = LoginLimiter::per_minute(settings.auth.login_attempts_per_minute);
        Self {
            store,
            hub: Arc::new(Hub::new()),
            jwt: Arc::new(jwt),
            settings: Arc::new(settings),
            login_limiter: Arc::new(login_limiter),
            ws_metrics: Arc::new(WebSocketMetrics::default()),
            started_at: Utc::now(),
        }
    }
}

/// Stale keys are dropped after this many checks.
const PRUNE_EVERY: usize = 1024;

/// Login attempts keyed by lower-cased email.
pub struct LoginLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    checks: AtomicUsize,
}

impl LoginLimiter {
    pub fn per_minute(attempts: u32) -> Self {
        let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
        Self::new(Quota::per_minute(burst))
    }

    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
            checks: AtomicUsize::new(0),
        }
    }

    /// False once the key has used up its attempts for the current window.
    pub fn check(&self, email: &str) -> bool {
        let allowed = self.limiter.check_key(&email.trim().to_lowercase()).is_ok();
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }
        allowed
    }

    /// Forgets emails whose window has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(tracked = self.limiter.len(), "Login limiter pruned");
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

#[derive(Default)]
pub struct WebSocketMetrics {
    pub active_connections: AtomicUsize,
    pub peak_connections: AtomicUsize,
    pub total_connections: AtomicUsize,
}

impl WebSocketMetrics {
    pub fn on_connect(&self) {
        let now = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while now > peak
            && self
                .peak_connections
                .compare_exchange(peak, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            peak = self.peak_connections.load(Ordering::Relaxed);
        }
    }

    pub fn on_disconnect(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.active_connections.load(Ordering::Relaxed),
            self.peak_connections.load(Ordering::Relaxed),
            self.total_connections.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn login_limiter_is_per_email() {
        let limiter = LoginLimiter::per_minute(2);
        assert!(limiter.check("a@x.io"));
        assert!(limiter.check("A@x.io "));
        assert!(!limiter.check("a@x.io"));
        assert!(limiter.check("b@x.io"));
    }

    #[test]
    fn login_limiter_forgets_idle_emails() {
        let quota = Quota::with_period(Duration::from_millis(1)).unwrap();
        let limiter = LoginLimiter::new(quota);
        for i in 0..PRUNE_EVERY - 1 {
            assert!(limiter.check(&format!("user{i}@x.io")));
        }
        assert_eq!(limiter.tracked_keys(), PRUNE_EVERY - 1);

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check("fresh@x.io"));
        assert_eq!(limiter.tracked_keys(), 1);

        std::thread::sleep(Duration::from_millis(20));
        limiter.prune();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn metrics_track_peak() {
        let metrics = WebSocketMetrics::default();
        metrics.on_connect();
        metrics.on_connect();
        metrics.on_disconnect();
        metrics.on_connect();
        assert_eq!(metrics.snapshot(), (2, 2, 3));
    }
}
