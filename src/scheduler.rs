//! Runs [`ScheduledJob`]s on fixed intervals until stopped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::interfaces::scheduler::ScheduledJob;

pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    handles: Vec<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            stop_tx,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    /// Spawn one task per registered job. The first run happens one interval
    /// after start.
    pub fn start(&mut self) {
        for job in self.jobs.drain(..) {
            let stop_rx = self.stop_tx.subscribe();
            self.handles.push(tokio::spawn(run_job(job, stop_rx)));
        }
    }

    /// Signal every job to stop and wait for them. A run already in progress
    /// finishes first.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn run_job(job: Arc<dyn ScheduledJob>, mut stop_rx: watch::Receiver<bool>) {
    let period = job.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(job = job.name(), ?period, "scheduled job started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = job.run().await {
                    tracing::warn!(job = job.name(), error = %err, "scheduled job failed");
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(job = job.name(), "scheduled job stopped");
}
