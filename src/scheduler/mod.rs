use std::sync::Arc;

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::interfaces::scheduler::ScheduledJob;

/// Runs each registered job on its own task until [`Scheduler::stop`].
pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    handles: Vec<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            stop: None,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    pub fn start(&mut self) {
        if self.stop.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        self.stop = Some(tx);

        for job in &self.jobs {
            let job = Arc::clone(job);
            let mut rx = rx.clone();
            let handle = tokio::spawn(async move {
                if job.run_on_start() {
                    run_once(job.as_ref()).await;
                }
                loop {
                    let delay = job.schedule().delay_from(Local::now().naive_local());
                    info!(job = job.name(), delay_secs = delay.as_secs(), "next run scheduled");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            run_once(job.as_ref()).await;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
            self.handles.push(handle);
        }
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_once(job: &dyn ScheduledJob) {
    info!(job = job.name(), "job started");
    match job.run().await {
        Ok(()) => info!(job = job.name(), "job finished"),
        Err(err) => error!(job = job.name(), error = %err, "job failed"),
    }
}
