// Instance completion poller (worker pool)
//
// Detects instances whose status moved to a terminal state
// (in_progress -> completed|failed) and resolves their dependents. The work
// predicate is status change + callback_processed = false; marking the
// callback processed is the idempotency barrier against re-resolution.
//
// The poller only activates; it never executes. Activated jobs get
// next_run_time = now and the job engine picks them up on its next poll.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use ambit_core::types::InstanceStatus;
use ambit_storage::{CompletedInstanceInfo, Database};

use crate::config::InstancePollerConfig;
use crate::resolver::DependencyResolver;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

pub struct InstancePoller {
    db: Database,
    resolver: DependencyResolver,
    config: InstancePollerConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl InstancePoller {
    pub fn new(db: Database, resolver: DependencyResolver, config: InstancePollerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            db,
            resolver,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            poll_interval = ?self.config.poll_interval,
            max_workers = self.config.max_workers,
            "InstancePoller starting"
        );

        let (queue_tx, queue_rx) = mpsc::channel::<CompletedInstanceInfo>(self.config.max_workers * 4);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.max_workers {
            let poller = Arc::clone(&self);
            let queue_rx = Arc::clone(&queue_rx);
            let mut shutdown = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = queue_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(info) = item else { break };
                    let instance_id = info.instance_id.clone();
                    debug!(worker_id, instance_id = %instance_id, "Processing completed instance");
                    poller.process_completed(info).await;
                    poller.in_flight.lock().await.remove(&instance_id);
                }
                debug!(worker_id, "Poller worker stopped");
            }));
        }

        let poller = Arc::clone(&self);
        let mut shutdown = self.shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = poller.poll_once(&queue_tx) => {}
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(poller.config.poll_interval) => {}
                }
            }
            debug!("Instance poller loop stopped");
        }));

        Ok(())
    }

    pub async fn stop(&self) {
        info!("InstancePoller stopping");
        let _ = self.shutdown_tx.send(true);

        let drained = timeout(SHUTDOWN_DRAIN, async {
            loop {
                if self.in_flight.lock().await.is_empty() {
                    break;
                }
                sleep(Duration::from_millis(200)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Timeout waiting for poller queue to drain, forcing shutdown");
        }

        for handle in self.handles.lock().await.drain(..) {
            handle.abort();
        }
        info!("InstancePoller stopped");
    }

    async fn poll_once(&self, queue_tx: &mpsc::Sender<CompletedInstanceInfo>) {
        let completed = match self
            .db
            .find_completed_unprocessed(self.config.batch_limit)
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                error!(error = %e, "Completed-instance query failed");
                return;
            }
        };
        if completed.is_empty() {
            return;
        }

        let mut enqueued = 0usize;
        for info in completed {
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(info.instance_id.clone()) {
                    debug!(instance_id = %info.instance_id, "Instance already processing, skipped");
                    continue;
                }
            }
            let instance_id = info.instance_id.clone();
            if queue_tx.send(info).await.is_err() {
                self.in_flight.lock().await.remove(&instance_id);
                return;
            }
            enqueued += 1;
        }
        if enqueued > 0 {
            info!(enqueued, "Enqueued completed instances");
        }
    }

    async fn process_completed(&self, info: CompletedInstanceInfo) {
        // Re-read for the authoritative terminal status; a second pass after
        // callback_processed flipped finds nothing to do
        let current = match self.db.get_instance(&info.instance_id).await {
            Ok(Some(row)) => row.into_domain(),
            Ok(None) => {
                warn!(instance_id = %info.instance_id, "Instance vanished before resolution");
                return;
            }
            Err(e) => {
                error!(instance_id = %info.instance_id, error = %e, "Instance re-read failed");
                return;
            }
        };
        if current.callback_processed {
            debug!(instance_id = %info.instance_id, "Callback already processed, skipping");
            return;
        }
        let new_status = if current.status == InstanceStatus::Failed {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Completed
        };

        match self
            .resolver
            .handle_completion(&info.narrative_id, &info.instance_id, new_status)
            .await
        {
            Ok(activated) => {
                if activated.is_empty() {
                    debug!(instance_id = %info.instance_id, "No dependents activated");
                } else {
                    info!(
                        instance_id = %info.instance_id,
                        activated = ?activated,
                        "Activated dependents (job engine will pick them up)"
                    );
                }
            }
            Err(e) => {
                // Mark processed anyway to avoid an infinite retry loop
                error!(instance_id = %info.instance_id, error = %e, "Dependency resolution failed");
            }
        }

        if let Err(e) = self
            .db
            .mark_callback_processed(&info.instance_id, current.status.as_str())
            .await
        {
            error!(instance_id = %info.instance_id, error = %e, "Failed to mark callback processed");
        }
    }
}
