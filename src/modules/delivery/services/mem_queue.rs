use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::TrackerConfig;
use crate::core::error::AicmResult;
use crate::modules::delivery::models::DeliveryStats;
use crate::modules::delivery::services::delivery_trait::{Delivery, DeliveryType, EnqueueOutcome};
use crate::modules::delivery::services::dispatcher::HttpDispatcher;
use crate::modules::delivery::services::shipper::Shipper;
use crate::modules::limits::services::limit_cache::TriggeredLimitsCache;
use crate::modules::tracker::models::UsageRecord;

/// Bounded in-memory FIFO with one background worker.
///
/// Explicitly lossy to preserve bounded memory: a full queue drops the new
/// record (counting it failed), and a batch that exhausts its retries is
/// dropped rather than requeued.
pub struct MemQueueDelivery {
    shipper: Arc<Shipper>,
    queue: Arc<Queue>,
    capacity: usize,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Queue {
    items: Mutex<VecDeque<serde_json::Value>>,
    notify: Notify,
}

impl MemQueueDelivery {
    /// Spawns the worker task; must be called from within a tokio runtime.
    pub fn new(config: &TrackerConfig, cache: TriggeredLimitsCache) -> AicmResult<Self> {
        let dispatcher = HttpDispatcher::new(
            config.track_endpoint(),
            config.api_key.clone(),
            config.timeout,
            config.max_retries,
            config.log_bodies,
        )?;
        let shipper = Arc::new(Shipper::new(
            dispatcher,
            cache,
            config.effective_api_key_id().to_owned(),
        ));
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(run_worker(
            Arc::clone(&shipper),
            Arc::clone(&queue),
            Arc::clone(&stop),
            config.batch_interval,
            config.max_batch_size,
        ));

        Ok(Self {
            shipper,
            queue,
            capacity: config.queue_size,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }
}

#[async_trait]
impl Delivery for MemQueueDelivery {
    fn delivery_type(&self) -> DeliveryType {
        DeliveryType::MemQueue
    }

    async fn enqueue(&self, record: UsageRecord) -> AicmResult<EnqueueOutcome> {
        self.shipper.precheck(&record)?;
        let value = serde_json::to_value(&record)?;
        {
            let mut items = self.queue.items.lock().unwrap();
            if items.len() >= self.capacity {
                warn!("delivery queue full, dropping record");
                self.shipper.record_dropped();
                return Ok(EnqueueOutcome::default());
            }
            items.push_back(value);
        }
        self.queue.notify.notify_one();
        Ok(EnqueueOutcome::default())
    }

    async fn stop(&self) -> AicmResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.notify.notify_waiters();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn stats(&self) -> AicmResult<DeliveryStats> {
        let queued = self.queue.items.lock().unwrap().len() as u64;
        let worker_alive = self
            .worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        Ok(self.shipper.stats(queued, worker_alive))
    }
}

async fn run_worker(
    shipper: Arc<Shipper>,
    queue: Arc<Queue>,
    stop: Arc<AtomicBool>,
    batch_interval: Duration,
    max_batch_size: usize,
) {
    debug!("mem queue worker started");
    let mut batch: Vec<serde_json::Value> = Vec::new();
    let mut last_flush = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let item = queue.items.lock().unwrap().pop_front();
        match item {
            Some(value) => {
                batch.push(value);
                if batch.len() >= max_batch_size {
                    send_batch(&shipper, &mut batch).await;
                    last_flush = Instant::now();
                }
            }
            None => {
                let _ = tokio::time::timeout(batch_interval, queue.notify.notified()).await;
            }
        }
        if !batch.is_empty() && last_flush.elapsed() >= batch_interval {
            send_batch(&shipper, &mut batch).await;
            last_flush = Instant::now();
        }
    }

    // Drain whatever is left without blocking.
    loop {
        let item = queue.items.lock().unwrap().pop_front();
        let Some(value) = item else { break };
        batch.push(value);
        if batch.len() >= max_batch_size {
            send_batch(&shipper, &mut batch).await;
        }
    }
    if !batch.is_empty() {
        send_batch(&shipper, &mut batch).await;
    }
    debug!("mem queue worker stopping");
}

async fn send_batch(shipper: &Shipper, batch: &mut Vec<serde_json::Value>) {
    let records = std::mem::take(batch);
    let count = records.len();
    if let Err(err) = shipper.ship(records).await {
        // Lossy by design: the failed batch is not requeued.
        error!(error = %err, dropped = count, "delivery failed");
    }
}
