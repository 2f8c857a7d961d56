//! Server reachability monitoring.
//!
//! Tracks the render server's availability as a small state machine
//! (`Unknown` / `Checking` / `Online` / `Offline`) and derives a sticky
//! `degraded` signal from it. The signal is deliberately quiet on the very
//! first check after startup: a server that has never been seen online is
//! not yet a regression worth surfacing, unless the startup retry budget is
//! exhausted.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::ServerStatus;

use super::client::ServerProbe;

const TARGET: &str = "application::render::monitor";

/// Published monitor state.
///
/// `degraded` is sticky: once raised it stays up until the server comes
/// back online or the operator dismisses it.
#[derive(Debug, Clone, Default)]
pub struct MonitorSnapshot {
    pub status: ServerStatus,
    pub last_check: Option<OffsetDateTime>,
    pub degraded: bool,
}

pub struct ServerMonitor<P> {
    probe: Arc<P>,
    base_rx: watch::Receiver<String>,
    state_tx: watch::Sender<MonitorSnapshot>,
}

impl<P: ServerProbe> ServerMonitor<P> {
    pub fn new(probe: Arc<P>, base_rx: watch::Receiver<String>) -> Self {
        let (state_tx, _) = watch::channel(MonitorSnapshot::default());
        Self {
            probe,
            base_rx,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.state_tx.borrow().clone()
    }

    /// Probe the current server endpoint once and publish the result.
    ///
    /// Returns whether the server answered. Going offline raises `degraded`
    /// only when a previous check already resolved the status, so the first
    /// check after startup stays quiet.
    pub async fn check_status(&self) -> bool {
        let previous = self.state_tx.borrow().status;
        self.state_tx.send_modify(|snapshot| {
            snapshot.status = ServerStatus::Checking;
        });

        let base = self.base_rx.borrow().clone();
        let online = self.probe.probe(base.clone()).await;
        let now = OffsetDateTime::now_utc();

        counter!(
            "plantpad_probe_total",
            "result" => if online { "online" } else { "offline" }
        )
        .increment(1);

        self.state_tx.send_modify(|snapshot| {
            snapshot.last_check = Some(now);
            if online {
                snapshot.status = ServerStatus::Online;
                snapshot.degraded = false;
            } else {
                snapshot.status = ServerStatus::Offline;
                if previous != ServerStatus::Unknown {
                    snapshot.degraded = true;
                }
            }
        });

        if online {
            info!(
                target = TARGET,
                op = "monitor::check",
                result = "online",
                base = %base,
                "Render server reachable"
            );
        } else {
            warn!(
                target = TARGET,
                op = "monitor::check",
                result = "offline",
                base = %base,
                previous = previous.label(),
                "Render server unreachable"
            );
        }

        online
    }

    /// Startup probe loop: up to `max_retries` checks, `delay` apart,
    /// stopping at the first success. Exhausting the budget without a
    /// success raises `degraded` even when no prior status existed.
    pub async fn check_status_with_retry(&self, max_retries: u32, delay: Duration) -> bool {
        for attempt in 1..=max_retries {
            if self.check_status().await {
                return true;
            }
            if attempt < max_retries {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            target = TARGET,
            op = "monitor::startup",
            result = "exhausted",
            max_retries,
            "Render server did not come up within the startup retry budget"
        );
        self.state_tx.send_modify(|snapshot| {
            if snapshot.status == ServerStatus::Offline {
                snapshot.degraded = true;
            }
        });
        false
    }

    /// Operator acknowledgement; the signal is re-raised on the next failed
    /// check.
    pub fn dismiss_warning(&self) {
        self.state_tx.send_modify(|snapshot| {
            snapshot.degraded = false;
        });
    }

    /// Periodic check loop. Re-checks immediately when the server endpoint
    /// switches (remote vs. embedded).
    pub async fn run(&self, poll_interval: Duration) {
        let mut base_rx = self.base_rx.clone();
        // First tick one full interval out; the startup retry sequence has
        // already resolved the status when this loop starts.
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + poll_interval,
            poll_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = base_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    ticker.reset();
                }
            }
            self.check_status().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeProbe {
        answers: Mutex<Vec<bool>>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        /// Answers are consumed front to back; once exhausted the probe
        /// keeps returning the last answer.
        fn new(answers: impl IntoIterator<Item = bool>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ServerProbe for FakeProbe {
        async fn probe(&self, _base: String) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers.first().copied().unwrap_or(false)
            }
        }
    }

    fn monitor<P: ServerProbe>(probe: Arc<P>) -> (ServerMonitor<P>, watch::Sender<String>) {
        let (base_tx, base_rx) = watch::channel("http://localhost:18123".to_string());
        (ServerMonitor::new(probe, base_rx), base_tx)
    }

    #[tokio::test]
    async fn successful_check_reports_online() {
        let (monitor, _base) = monitor(FakeProbe::new([true]));

        assert!(monitor.check_status().await);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Online);
        assert!(snapshot.last_check.is_some());
        assert!(!snapshot.degraded);
    }

    #[tokio::test]
    async fn first_failed_check_stays_quiet() {
        let (monitor, _base) = monitor(FakeProbe::new([false]));

        assert!(!monitor.check_status().await);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Offline);
        assert!(!snapshot.degraded, "first offline result must not warn");
    }

    #[tokio::test]
    async fn going_offline_after_online_raises_degraded() {
        let (monitor, _base) = monitor(FakeProbe::new([true, false]));

        monitor.check_status().await;
        monitor.check_status().await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Offline);
        assert!(snapshot.degraded);
    }

    #[tokio::test]
    async fn recovery_clears_degraded() {
        let (monitor, _base) = monitor(FakeProbe::new([true, false, true]));

        monitor.check_status().await;
        monitor.check_status().await;
        assert!(monitor.snapshot().degraded);

        monitor.check_status().await;
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Online);
        assert!(!snapshot.degraded);
    }

    #[tokio::test]
    async fn dismissed_warning_returns_on_next_failure() {
        let (monitor, _base) = monitor(FakeProbe::new([true, false]));

        monitor.check_status().await;
        monitor.check_status().await;
        assert!(monitor.snapshot().degraded);

        monitor.dismiss_warning();
        assert!(!monitor.snapshot().degraded);

        monitor.check_status().await;
        assert!(monitor.snapshot().degraded);
    }

    /// Answers only once its gate is released, so the in-flight state is
    /// observable from outside.
    struct GatedProbe {
        gate: Mutex<Option<tokio::sync::oneshot::Receiver<bool>>>,
    }

    impl ServerProbe for GatedProbe {
        async fn probe(&self, _base: String) -> bool {
            let gate = self.gate.lock().unwrap().take();
            match gate {
                Some(gate) => gate.await.unwrap_or(false),
                None => false,
            }
        }
    }

    #[tokio::test]
    async fn checking_is_published_while_a_probe_is_in_flight() {
        let (release, gate) = tokio::sync::oneshot::channel();
        let probe = Arc::new(GatedProbe {
            gate: Mutex::new(Some(gate)),
        });
        let (monitor, _base) = monitor(probe);
        let monitor = Arc::new(monitor);

        let mut states = monitor.subscribe();
        let check = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.check_status().await }
        });

        // Checking must be visible while the probe is pending.
        states
            .wait_for(|snapshot| snapshot.status == ServerStatus::Checking)
            .await
            .expect("monitor alive");

        release.send(true).expect("probe released");
        assert!(check.await.expect("check task"));

        // Checking is transient: the probe resolution replaces it.
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Online);
        assert!(snapshot.last_check.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_waits_a_full_interval_before_probing() {
        let probe = FakeProbe::new([true]);
        let (monitor, _base) = monitor(Arc::clone(&probe));
        let monitor = Arc::new(monitor);

        let run = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run(Duration::from_secs(30)).await }
        });

        // No probe right after startup; the first check belongs to the
        // startup retry sequence, not this loop.
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(probe.calls(), 0);

        let mut states = monitor.subscribe();
        states
            .wait_for(|snapshot| snapshot.last_check.is_some())
            .await
            .expect("monitor alive");
        assert_eq!(probe.calls(), 1);

        run.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn startup_retry_stops_at_first_success() {
        let probe = FakeProbe::new([false, false, true]);
        let (monitor, _base) = monitor(Arc::clone(&probe));

        assert!(
            monitor
                .check_status_with_retry(5, Duration::from_millis(100))
                .await
        );
        assert_eq!(probe.calls(), 3);
        assert!(monitor.snapshot().status.is_online());
        assert!(!monitor.snapshot().degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_startup_retries_raise_degraded() {
        let probe = FakeProbe::new([false]);
        let (monitor, _base) = monitor(Arc::clone(&probe));

        assert!(
            !monitor
                .check_status_with_retry(5, Duration::from_millis(100))
                .await
        );
        assert_eq!(probe.calls(), 5);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, ServerStatus::Offline);
        assert!(snapshot.degraded);
    }
}
