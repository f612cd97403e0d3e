use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    FullScan,
    Validate,
    Report,
}

impl Job {
    const fn name(self) -> &'static str {
        match self {
            Self::FullScan => "full scan",
            Self::Validate => "link validation",
            Self::Report => "report",
        }
    }
}

/// Periodic full scan, validation and report generation.
///
/// Each tick only runs when the mutation lock is free; a busy registry defers the job to the
/// next tick instead of queueing it.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn(registry: Arc<Registry>) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let schedule = registry.config().schedule;

        let handle = tokio::spawn(async move {
            let mut full_scan = periodic(schedule.full_scan_interval());
            let mut validate = periodic(schedule.validate_interval());
            let mut report = periodic(schedule.report_interval());

            loop {
                let job = tokio::select! {
                    _ = full_scan.tick() => Job::FullScan,
                    _ = validate.tick() => Job::Validate,
                    _ = report.tick() => Job::Report,
                    _ = stop_rx.changed() => break,
                };
                run_job(&registry, job).await;
            }
            log::debug!("Scheduler stopped");
        });

        Self { stop_tx, handle }
    }

    /// Stop ticking and wait for a job in progress to finish.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.handle.await {
            log::warn!("Scheduler task ended abnormally: {err}");
        }
    }
}

/// First tick one full period from now; missed ticks are skipped, not replayed.
fn periodic(period: Duration) -> time::Interval {
    let period = period.max(Duration::from_secs(1));
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run_job(registry: &Registry, job: Job) {
    let result = match job {
        Job::FullScan => registry.try_scan_all().await.map(|o| o.is_deferred()),
        Job::Validate => registry.try_validate_all().await.map(|o| o.is_deferred()),
        Job::Report => registry.try_write_report().await.map(|o| o.is_deferred()),
    };
    match result {
        Ok(true) => log::info!("Periodic {} deferred to next tick", job.name()),
        Ok(false) => log::debug!("Periodic {} finished", job.name()),
        Err(err) => log::warn!("Periodic {} failed: {err}", job.name()),
    }
}
