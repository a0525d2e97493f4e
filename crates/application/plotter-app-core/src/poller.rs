use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use plotter_core::DeviceStatus;
use plotter_infra::{PlotterApi, TransportError};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_core::SyncEvent;

/// Result of one status fetch as seen by the poller itself.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Status(DeviceStatus),
    Failed {
        consecutive_failures: u32,
        degraded: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerSnapshot {
    pub latest: Option<DeviceStatus>,
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub running: bool,
}

/// Periodically fetches `/status` and forwards each observation as a `SyncEvent`.
///
/// At most one fetch is outstanding at any time. A tick that finds a fetch
/// still in flight is skipped rather than queued.
pub struct StatusPoller<A: PlotterApi> {
    worker: Arc<PollWorker<A>>,
    running: Mutex<Option<CancellationToken>>,
}

struct PollWorker<A: PlotterApi> {
    api: Arc<A>,
    tx: mpsc::Sender<SyncEvent>,
    failure_threshold: u32,
    status_timeout: Duration,
    sequence: AtomicU64,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    snapshot: watch::Sender<PollerSnapshot>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A: PlotterApi> StatusPoller<A> {
    pub fn new(
        api: Arc<A>,
        tx: mpsc::Sender<SyncEvent>,
        failure_threshold: u32,
        status_timeout: Duration,
    ) -> Self {
        let (snapshot, _) = watch::channel(PollerSnapshot::default());
        Self {
            worker: Arc::new(PollWorker {
                api,
                tx,
                failure_threshold: failure_threshold.max(1),
                status_timeout,
                sequence: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                snapshot,
            }),
            running: Mutex::new(None),
        }
    }

    /// Begin polling every `interval`. Returns false if polling was already running.
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        self.worker.snapshot.send_modify(|s| s.running = true);

        info!(interval_ms = interval.as_millis() as u64, "status polling started");
        let worker = self.worker.clone();
        crate::async_runtime::spawn(async move {
            worker.run(interval, token).await;
        });
        true
    }

    /// Stop polling. A fetch already on the wire is abandoned and never reported.
    pub fn stop(&self) -> bool {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match token {
            Some(token) => {
                token.cancel();
                self.worker.snapshot.send_modify(|s| s.running = false);
                info!("status polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// One fetch outside the schedule. `None` if another fetch was already in flight.
    pub async fn poll_once(&self) -> Option<PollOutcome> {
        self.worker.fetch(&CancellationToken::new()).await
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        self.worker.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.worker.snapshot.subscribe()
    }
}

impl<A: PlotterApi> Drop for StatusPoller<A> {
    fn drop(&mut self) {
        if let Some(token) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

impl<A: PlotterApi> PollWorker<A> {
    async fn run(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.fetch(&cancel).await;
                }
            }
        }
        debug!("poll loop exited");
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Option<PollOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous status fetch still in flight, skipping");
            return None;
        }
        let _guard = InFlightGuard(&self.in_flight);

        // Stamped at issue so a slow response can never overwrite a newer one.
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(sequence, "status fetch abandoned");
                return None;
            }
            res = tokio::time::timeout(self.status_timeout, self.api.fetch_status()) => res,
        };
        let result = match result {
            Ok(res) => res,
            Err(_) => Err(TransportError::Timeout {
                url: format!("{}status", self.api.base_url()),
            }),
        };

        let at = Utc::now();
        let outcome = match result {
            Ok(payload) => {
                let status = payload.into_status(sequence, at);
                self.consecutive_failures.store(0, Ordering::Release);
                self.snapshot.send_modify(|s| {
                    s.latest = Some(status.clone());
                    s.consecutive_failures = 0;
                    s.degraded = false;
                });
                self.report(SyncEvent::StatusReceived(status.clone()), cancel).await;
                PollOutcome::Status(status)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                let degraded = failures >= self.failure_threshold;
                if degraded {
                    warn!(sequence, failures, "status fetch failed: {e}");
                } else {
                    debug!(sequence, failures, "status fetch failed: {e}");
                }
                self.snapshot.send_modify(|s| {
                    s.consecutive_failures = failures;
                    s.degraded = degraded;
                });
                self.report(
                    SyncEvent::StatusFetchFailed {
                        sequence,
                        at,
                        error: e.to_string(),
                        consecutive_failures: failures,
                        degraded,
                    },
                    cancel,
                )
                .await;
                PollOutcome::Failed {
                    consecutive_failures: failures,
                    degraded,
                }
            }
        };
        Some(outcome)
    }

    /// Forward `ev` to the kernel unless polling stops while the intake is full.
    async fn report(&self, ev: SyncEvent, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => debug!("status result dropped, polling stopped"),
            _ = self.tx.send(ev) => {}
        }
    }
}
