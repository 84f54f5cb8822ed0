use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::core::error::AicmResult;
use crate::modules::delivery::models::{
    DeliveryStats, QueueHealth, QueueItem, QueueStatus, TrackResponse,
};
use crate::modules::delivery::repositories::queue_repository::{QueueRepository, QueueRow};
use crate::modules::delivery::services::delivery_trait::{Delivery, DeliveryType, EnqueueOutcome};
use crate::modules::delivery::services::dispatcher::HttpDispatcher;
use crate::modules::delivery::services::shipper::Shipper;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;
use crate::modules::tracker::models::UsageRecord;

/// Upper bound on drain iterations during shutdown.
const DRAIN_SAFETY_CAP: usize = 1_000;

/// Durable, crash-safe, at-least-once delivery backed by a local SQLite
/// queue. Back-pressure is absorbed on disk; a crash between pickup and
/// acknowledgement is recovered by the startup reclaim, which may redeliver
/// (the server dedupes on `response_id`).
pub struct PersistentDelivery {
    shipper: Arc<Shipper>,
    repo: Arc<QueueRepository>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct WorkerConfig {
    poll_interval: Duration,
    batch_interval: Duration,
    max_batch_size: usize,
    max_retries: i64,
}

impl PersistentDelivery {
    /// Open the queue database (creating it and reclaiming orphaned rows),
    /// then spawn the worker. Must be called from within a tokio runtime.
    pub async fn new(config: &TrackerConfig, cache: TriggeredLimitsCache) -> AicmResult<Self> {
        let dispatcher = HttpDispatcher::new(
            config.track_endpoint(),
            config.api_key.clone(),
            config.timeout,
            config.max_attempts,
            config.log_bodies,
        )?;
        let shipper = Arc::new(Shipper::new(
            dispatcher,
            cache.clone(),
            config.effective_api_key_id().to_owned(),
        ));

        let db_path = config.resolve_db_path(cache.ini())?;
        let repo = Arc::new(QueueRepository::connect(&db_path).await?);
        let reclaimed = repo.reclaim(config.reclaim_threshold).await?;
        if reclaimed > 0 {
            info!(reclaimed, "requeued orphaned processing rows");
        }

        let stop = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shipper),
            Arc::clone(&repo),
            Arc::clone(&stop),
            WorkerConfig {
                poll_interval: config.poll_interval,
                batch_interval: config.batch_interval,
                max_batch_size: config.max_batch_size,
                max_retries: config.max_retries as i64,
            },
        ));

        Ok(Self {
            shipper,
            repo,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Ship one record immediately with retries, bypassing the queue.
    pub async fn deliver_now(&self, record: &UsageRecord) -> AicmResult<TrackResponse> {
        self.deliver_batch(std::slice::from_ref(record)).await
    }

    /// Ship a batch immediately with retries, bypassing the queue.
    pub async fn deliver_batch(&self, records: &[UsageRecord]) -> AicmResult<TrackResponse> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.shipper.ship(values).await
    }

    /// Per-status row counts, for operational visibility.
    pub async fn status_counts(&self) -> AicmResult<std::collections::BTreeMap<String, i64>> {
        self.repo.status_counts().await
    }

    /// Row counts plus worker liveness, the shape operators poll.
    pub async fn health(&self) -> AicmResult<QueueHealth> {
        Ok(QueueHealth {
            counts: self.repo.status_counts().await?,
            worker_alive: self.worker_alive(),
        })
    }

    /// Peek at rows in a given status, oldest first.
    pub async fn list_messages(
        &self,
        status: QueueStatus,
        limit: i64,
    ) -> AicmResult<Vec<QueueItem>> {
        let rows = self.repo.list(status, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| QueueItem {
                id: row.id,
                record: serde_json::from_str(&row.payload)
                    .unwrap_or(serde_json::Value::Null),
                retry_count: row.retry_count,
                scheduled_at: row.scheduled_at,
            })
            .collect())
    }

    fn worker_alive(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl Delivery for PersistentDelivery {
    fn delivery_type(&self) -> DeliveryType {
        DeliveryType::PersistentQueue
    }

    async fn enqueue(&self, record: UsageRecord) -> AicmResult<EnqueueOutcome> {
        self.shipper.precheck(&record)?;
        let payload = serde_json::to_string(&record)?;
        let row_id = self.repo.enqueue(&payload).await?;
        Ok(EnqueueOutcome {
            response: None,
            row_id: Some(row_id),
        })
    }

    async fn stop(&self) -> AicmResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Failed rows stay behind for inspection; only the pool closes.
        self.repo.close().await;
        Ok(())
    }

    async fn stats(&self) -> AicmResult<DeliveryStats> {
        let queued = self.repo.queued_count().await? as u64;
        Ok(self.shipper.stats(queued, self.worker_alive()))
    }
}

async fn run_worker(
    shipper: Arc<Shipper>,
    repo: Arc<QueueRepository>,
    stop: Arc<AtomicBool>,
    config: WorkerConfig,
) {
    debug!("persistent queue worker started");
    let mut buffer: Vec<QueueRow> = Vec::new();
    let mut first_at: Option<Instant> = None;

    while !stop.load(Ordering::SeqCst) {
        let needed = config.max_batch_size.saturating_sub(buffer.len());
        if needed > 0 {
            match repo.fetch_batch(needed as i64).await {
                Ok(rows) => {
                    if !rows.is_empty() {
                        if first_at.is_none() {
                            first_at = Some(Instant::now());
                        }
                        buffer.extend(rows);
                    }
                }
                Err(err) => error!(error = %err, "queue pickup failed"),
            }
        }

        let interval_elapsed = first_at
            .map(|at| at.elapsed() >= config.batch_interval)
            .unwrap_or(false);
        if !buffer.is_empty() && (buffer.len() >= config.max_batch_size || interval_elapsed) {
            flush(&shipper, &repo, &mut buffer, config.max_retries).await;
            first_at = None;
            continue;
        }

        let sleep_for = match first_at {
            Some(at) if !buffer.is_empty() => {
                let remaining = config.batch_interval.saturating_sub(at.elapsed());
                config.poll_interval.min(remaining)
            }
            _ => config.poll_interval,
        };
        tokio::time::sleep(sleep_for).await;
    }

    // Final flush plus a bounded non-blocking drain of whatever is still
    // eligible, so pending work is on the wire before shutdown.
    if !buffer.is_empty() {
        flush(&shipper, &repo, &mut buffer, config.max_retries).await;
    }
    for _ in 0..DRAIN_SAFETY_CAP {
        match repo.fetch_batch(config.max_batch_size as i64).await {
            Ok(rows) if !rows.is_empty() => {
                buffer = rows;
                flush(&shipper, &repo, &mut buffer, config.max_retries).await;
            }
            Ok(_) => break,
            Err(err) => {
                error!(error = %err, "drain pickup failed");
                break;
            }
        }
    }
    debug!("persistent queue worker stopping");
}

async fn flush(
    shipper: &Shipper,
    repo: &QueueRepository,
    buffer: &mut Vec<QueueRow>,
    max_retries: i64,
) {
    if buffer.is_empty() {
        return;
    }
    let mut ids = Vec::with_capacity(buffer.len());
    let mut payloads = Vec::with_capacity(buffer.len());
    let mut poisoned = Vec::new();
    for row in buffer.iter() {
        match serde_json::from_str::<serde_json::Value>(&row.payload) {
            Ok(value) => {
                ids.push(row.id);
                payloads.push(value);
            }
            Err(err) => {
                error!(id = row.id, error = %err, "unreadable payload, marking failed");
                poisoned.push(row.id);
            }
        }
    }
    if !poisoned.is_empty() {
        for id in &poisoned {
            let _ = repo.reschedule(*id, max_retries, max_retries).await;
        }
        buffer.retain(|row| !poisoned.contains(&row.id));
    }
    if payloads.is_empty() {
        buffer.clear();
        return;
    }

    match shipper.ship(payloads).await {
        Ok(_) => {
            if let Err(err) = repo.ack(&ids).await {
                error!(error = %err, "failed to acknowledge delivered rows");
            }
        }
        Err(err) => {
            error!(error = %err, "batch delivery failed");
            for row in buffer.iter() {
                match repo.reschedule(row.id, row.retry_count + 1, max_retries).await {
                    Ok(QueueStatus::Failed) => {
                        warn!(id = row.id, "message exhausted retries, marked failed");
                    }
                    Ok(_) => {}
                    Err(err) => error!(id = row.id, error = %err, "reschedule failed"),
                }
            }
        }
    }
    buffer.clear();
}
