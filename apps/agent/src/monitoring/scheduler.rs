use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uplink::{CheckResult, Controller, SubmitRoute, Target, TransportError};

use super::checker::Checker;
use super::interval::{MAX_POLL_INTERVAL, adaptive_poll_interval, parse_scan_interval};

/// A running probe loop and the target snapshot it was started with
#[derive(Debug)]
struct ScheduleEntry {
    target: Target,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Schedule {
    entries: HashMap<i64, ScheduleEntry>,
    poll_interval: Duration,
}

/// Target ids started and stopped by one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: Vec<i64>,
    pub stopped: Vec<i64>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Monitoring scheduler - keeps one probe loop per target in step with the
/// controller's target list
pub struct MonitoringScheduler {
    controller: Arc<dyn Controller>,
    checker: Arc<dyn Checker>,
    schedule: RwLock<Schedule>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler. Every loop it spawns runs under
    /// `cancel`.
    pub fn new(
        controller: Arc<dyn Controller>,
        checker: Arc<dyn Checker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            checker,
            schedule: RwLock::new(Schedule {
                entries: HashMap::new(),
                poll_interval: MAX_POLL_INTERVAL,
            }),
            cancel,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Schedule the initial target list, then start the push update listener
    /// (when a queue is given) and the fallback poll loop
    pub async fn start(
        self: &Arc<Self>,
        initial: &[Target],
        updates: Option<mpsc::Receiver<Vec<Target>>>,
    ) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Monitoring scheduler already started");
            return;
        }

        info!(targets = initial.len(), "Starting monitoring scheduler");
        self.reconcile(initial).await;

        if let Some(updates) = updates {
            tokio::spawn(Arc::clone(self).listen_for_updates(updates));
        }
        tokio::spawn(Arc::clone(self).poll_loop());
    }

    /// Fetch the target list over the request path and reconcile against it
    pub async fn refresh(&self) -> Result<ReconcileSummary, TransportError> {
        let targets = self.controller.fetch_targets().await?;
        Ok(self.reconcile(&targets).await)
    }

    /// Bring the running probe loops in line with `targets`.
    ///
    /// Loops for ids missing from the list are cancelled, ids not yet running
    /// get a new loop and ids present in both keep their existing loop. The
    /// poll interval is recomputed from the full list.
    pub async fn reconcile(&self, targets: &[Target]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut schedule = self.schedule.write().await;
        if self.stopped.load(Ordering::SeqCst) {
            debug!("Scheduler stopped, ignoring target list");
            return summary;
        }

        let wanted: HashMap<i64, &Target> =
            targets.iter().map(|target| (target.id, target)).collect();

        schedule.entries.retain(|id, entry| {
            if wanted.contains_key(id) {
                return true;
            }
            info!(target_id = id, name = %entry.target.name, "Stopping monitoring for removed target");
            entry.cancel.cancel();
            summary.stopped.push(*id);
            false
        });

        for target in targets {
            if schedule.entries.contains_key(&target.id) {
                continue;
            }

            let period = match parse_scan_interval(&target.scan_interval) {
                Ok(period) if !period.is_zero() => period,
                Ok(_) => {
                    error!(
                        target_id = target.id,
                        name = %target.name,
                        "Scan interval {:?} is zero, target not monitored",
                        target.scan_interval
                    );
                    continue;
                }
                Err(e) => {
                    error!(target_id = target.id, name = %target.name, "Invalid scan interval: {}", e);
                    continue;
                }
            };

            info!(target_id = target.id, name = %target.name, "Starting monitoring for new target");
            let cancel = self.cancel.child_token();
            tokio::spawn(probe_loop(
                Arc::clone(&self.controller),
                Arc::clone(&self.checker),
                target.clone(),
                period,
                cancel.clone(),
            ));
            schedule.entries.insert(target.id, ScheduleEntry { target: target.clone(), cancel });
            summary.started.push(target.id);
        }

        schedule.poll_interval = adaptive_poll_interval(targets);
        if summary.is_empty() {
            debug!(active = schedule.entries.len(), "Target list unchanged");
        } else {
            info!(
                active = schedule.entries.len(),
                started = summary.started.len(),
                stopped = summary.stopped.len(),
                poll_interval = ?schedule.poll_interval,
                "Monitoring refresh complete"
            );
        }

        summary
    }

    /// Number of targets with a running probe loop
    pub async fn active_count(&self) -> usize {
        self.schedule.read().await.entries.len()
    }

    /// Current period of the fallback poll loop
    pub async fn poll_interval(&self) -> Duration {
        self.schedule.read().await.poll_interval
    }

    /// Cancel every probe loop and both background loops. Safe to call more
    /// than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping monitoring scheduler");
        let mut schedule = self.schedule.write().await;
        for (_, entry) in schedule.entries.drain() {
            entry.cancel.cancel();
        }
        self.cancel.cancel();
        info!("Monitoring scheduler stopped");
    }

    async fn listen_for_updates(self: Arc<Self>, mut updates: mpsc::Receiver<Vec<Target>>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                update = updates.recv() => match update {
                    Some(targets) => {
                        info!(targets = targets.len(), "Processing pushed target update");
                        self.reconcile(&targets).await;
                    }
                    None => {
                        info!("Update queue closed");
                        return;
                    }
                },
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            let period = self.poll_interval().await;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = sleep(period) => {}
            }

            if self.controller.is_push_connected().await {
                debug!("Push channel live, skipping poll");
                continue;
            }

            if let Err(e) = self.refresh().await {
                error!("Failed to refresh targets: {}", e);
            }
            self.controller.reconnect_push(&self.cancel).await;
        }
    }
}

/// Probe `target` immediately and then every `period` until cancelled
async fn probe_loop(
    controller: Arc<dyn Controller>,
    checker: Arc<dyn Checker>,
    target: Target,
    period: Duration,
    cancel: CancellationToken,
) {
    info!(
        target_id = target.id,
        name = %target.name,
        interval = %target.scan_interval,
        "Monitoring started"
    );

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        let result = checker.check(&target).await;
        log_check_result(&target, &result);
        submit(controller.as_ref(), &result).await;
    }

    info!(target_id = target.id, name = %target.name, "Monitoring stopped");
}

/// Best-effort submission; failures are logged and never end the loop
async fn submit(controller: &dyn Controller, result: &CheckResult) {
    match controller.submit_result(result).await {
        Ok(SubmitRoute::Request { accepted: false }) => {
            debug!(target_id = result.target_id, "Result submitted but not accepted")
        }
        Ok(route) => debug!(target_id = result.target_id, ?route, "Result submitted"),
        Err(e) => warn!(target_id = result.target_id, "Failed to submit result: {}", e),
    }
}

fn log_check_result(target: &Target, result: &CheckResult) {
    if result.is_up() {
        info!(
            target_id = target.id,
            name = %target.name,
            response_time = ?result.response_time,
            status_code = ?result.status_code,
            "Target up"
        );
    } else {
        warn!(
            target_id = target.id,
            name = %target.name,
            response_time = ?result.response_time,
            status_code = ?result.status_code,
            error = result.error_message.as_deref().unwrap_or_default(),
            "Target down"
        );
    }
}
