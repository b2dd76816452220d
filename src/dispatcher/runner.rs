//! Dispatcher loop and its handle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::DispatcherConfig;
use super::handler::WorkHandler;
use super::item::{OnComplete, OnError, WorkItem, WorkKind};
use super::snapshot::{QueueSnapshot, SnapshotItem};
use super::DispatchError;
use crate::analysis::AnalysisError;
use crate::rate_limit::{backoff_delay, RateLimiter};

type Outcome = Result<serde_json::Value, AnalysisError>;

enum Command {
    Enqueue(WorkItem),
    Cancel {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    Status(oneshot::Sender<QueueStatus>),
    Shutdown(oneshot::Sender<usize>),
}

/// Queue depth at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub queued: usize,
    pub active: usize,
}

/// Handle to a running dispatcher. Clones talk to the same loop.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Command>,
}

impl Dispatcher {
    /// Start the dispatcher loop on the current runtime.
    pub fn spawn(
        config: DispatcherConfig,
        limiter: RateLimiter,
        handler: Arc<dyn WorkHandler>,
        snapshot: Option<QueueSnapshot>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let runner = Runner {
            config,
            limiter,
            handler,
            snapshot,
            queue: VecDeque::new(),
            active: HashMap::new(),
            tasks: JoinSet::new(),
            task_ids: HashMap::new(),
            next_seq: 0,
        };
        tokio::spawn(runner.run(rx));
        Self { tx }
    }

    /// Queue an item. Returns its id.
    ///
    /// Exactly one of the callbacks is eventually called, unless the
    /// dispatcher is dropped without a shutdown.
    pub async fn enqueue(
        &self,
        kind: WorkKind,
        payload: serde_json::Value,
        identity: &str,
        on_complete: OnComplete,
        on_error: OnError,
    ) -> Result<String, DispatchError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.submit(WorkItem {
            id: id.clone(),
            seq: 0,
            kind,
            identity: identity.to_string(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
            not_before: None,
            cancelled: false,
            on_complete,
            on_error,
        })
        .await?;
        Ok(id)
    }

    /// Re-queue an item restored from a snapshot, keeping its id and
    /// attempt count.
    pub async fn requeue(
        &self,
        item: SnapshotItem,
        on_complete: OnComplete,
        on_error: OnError,
    ) -> Result<String, DispatchError> {
        let id = item.id.clone();
        self.submit(WorkItem {
            id: item.id,
            seq: 0,
            kind: item.kind,
            identity: item.identity,
            payload: item.payload,
            attempts: item.attempts,
            enqueued_at: item.enqueued_at,
            not_before: None,
            cancelled: false,
            on_complete,
            on_error,
        })
        .await?;
        Ok(id)
    }

    async fn submit(&self, item: WorkItem) -> Result<(), DispatchError> {
        self.tx
            .send(Command::Enqueue(item))
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Cancel a queued or in-flight item. Returns false for unknown ids.
    pub async fn cancel(&self, id: &str) -> Result<bool, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cancel {
                id: id.to_string(),
                reply,
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    pub async fn status(&self) -> Result<QueueStatus, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status(reply))
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Cancel everything in flight, snapshot unfinished items and stop.
    ///
    /// Returns the number of items written to the snapshot.
    pub async fn shutdown(&self) -> Result<usize, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)
    }
}

struct Active {
    item: WorkItem,
    token: CancellationToken,
}

/// State owned by the dispatcher task.
struct Runner {
    config: DispatcherConfig,
    limiter: RateLimiter,
    handler: Arc<dyn WorkHandler>,
    snapshot: Option<QueueSnapshot>,
    /// Waiting items in enqueue order.
    queue: VecDeque<WorkItem>,
    active: HashMap<String, Active>,
    tasks: JoinSet<Outcome>,
    task_ids: HashMap<Id, String>,
    next_seq: u64,
}

impl Runner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            self.dispatch_ready();
            let wake = self.next_wake();

            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Enqueue(item)) => self.push(item),
                    Some(Command::Cancel { id, reply }) => {
                        let _ = reply.send(self.cancel(&id));
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Shutdown(reply)) => {
                        let saved = self.shutdown().await;
                        let _ = reply.send(saved);
                        return;
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.finish(joined);
                }
                _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {}
            }
        }
    }

    fn push(&mut self, mut item: WorkItem) {
        item.seq = self.next_seq;
        self.next_seq += 1;
        debug!("Queued {} item {} for {}", item.kind, item.id, item.identity);
        self.queue.push_back(item);
    }

    /// Put a retried item back at its original position.
    fn requeue(&mut self, item: WorkItem) {
        let pos = self.queue.partition_point(|q| q.seq < item.seq);
        self.queue.insert(pos, item);
    }

    /// Start every queued item the global cap and the limiter admit.
    ///
    /// Once an identity's item is passed over, its later items are too, so
    /// each identity is served in order.
    fn dispatch_ready(&mut self) {
        let now = Instant::now();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut i = 0;

        while self.active.len() < self.config.max_concurrent && i < self.queue.len() {
            let item = &self.queue[i];
            if blocked.contains(&item.identity) {
                i += 1;
                continue;
            }
            if !item.is_ready(now) || !self.limiter.is_allowed(&item.identity) {
                debug!(
                    "Holding {} for {}: {:?}",
                    item.id,
                    item.identity,
                    self.limiter.stats(&item.identity)
                );
                blocked.insert(item.identity.clone());
                i += 1;
                continue;
            }
            let Some(item) = self.queue.remove(i) else {
                break;
            };
            self.start(item);
        }
    }

    fn start(&mut self, mut item: WorkItem) {
        item.attempts += 1;
        self.limiter.add_request(&item.identity);

        let token = CancellationToken::new();
        let request = item.request();
        let handler = self.handler.clone();
        let task_token = token.clone();
        info!(
            "Dispatching {} item {} for {} (attempt {})",
            item.kind, item.id, item.identity, item.attempts
        );

        let handle = self.tasks.spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => Err(AnalysisError::Aborted),
                result = handler.handle(&request, task_token.clone()) => result,
            }
        });
        self.task_ids.insert(handle.id(), item.id.clone());
        self.active.insert(item.id.clone(), Active { item, token });
    }

    fn finish(&mut self, joined: Result<(Id, Outcome), JoinError>) {
        let (task_id, outcome) = match joined {
            Ok((task_id, result)) => (task_id, Ok(result)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(item_id) = self.task_ids.remove(&task_id) else {
            return;
        };
        let Some(Active { mut item, .. }) = self.active.remove(&item_id) else {
            return;
        };
        self.limiter.remove_request(&item.identity);
        if self.queue.is_empty() {
            self.limiter.prune_idle();
        }

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("Worker for {} died: {}", item.id, e);
                item.fail(DispatchError::Worker(e.to_string()));
                return;
            }
        };

        match result {
            Ok(value) => {
                info!("Item {} completed", item.id);
                (item.on_complete)(value);
            }
            Err(_) if item.cancelled => {
                info!("Item {} cancelled", item.id);
                item.fail(DispatchError::Cancelled);
            }
            Err(err) if err.is_retryable() && item.attempts < self.config.max_attempts => {
                let delay = backoff_delay(item.attempts - 1, self.config.backoff_base_ms);
                warn!(
                    "Item {} failed ({}), retrying in {:?} ({}/{})",
                    item.id, err, delay, item.attempts, self.config.max_attempts
                );
                item.not_before = Some(Instant::now() + delay);
                self.requeue(item);
            }
            Err(err) => {
                warn!("Item {} failed: {}", item.id, err);
                let attempts = item.attempts;
                item.fail(DispatchError::Failed {
                    attempts,
                    source: err,
                });
            }
        }
    }

    fn cancel(&mut self, id: &str) -> bool {
        if let Some(pos) = self.queue.iter().position(|i| i.id == id) {
            if let Some(item) = self.queue.remove(pos) {
                info!("Item {} cancelled before dispatch", id);
                item.fail(DispatchError::Cancelled);
            }
            return true;
        }
        match self.active.get_mut(id) {
            Some(active) => {
                active.item.cancelled = true;
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    fn status(&self) -> QueueStatus {
        QueueStatus {
            queued: self.queue.len(),
            active: self.active.len(),
        }
    }

    /// Earliest moment a held item could become dispatchable.
    ///
    /// Only the first queued item of each identity counts, since the rest
    /// wait behind it. Items held by an in-flight cap are woken by
    /// completions instead.
    fn next_wake(&mut self) -> Option<Instant> {
        if self.queue.is_empty() || self.active.len() >= self.config.max_concurrent {
            return None;
        }
        let now = Instant::now();
        let per_identity = self.limiter.config().max_concurrent;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut wake: Option<Instant> = None;

        for item in &self.queue {
            if !seen.insert(item.identity.as_str()) {
                continue;
            }
            let at = match item.not_before {
                Some(t) if t > now => t,
                _ if self.limiter.active(&item.identity) >= per_identity => continue,
                _ => {
                    let reset = self.limiter.time_until_reset(&item.identity);
                    now + reset.max(Duration::from_millis(1))
                }
            };
            wake = Some(wake.map_or(at, |w| w.min(at)));
        }
        wake
    }

    async fn shutdown(&mut self) -> usize {
        for active in self.active.values() {
            active.token.cancel();
        }
        let mut items: Vec<WorkItem> = self.queue.drain(..).collect();
        items.extend(self.active.drain().map(|(_, a)| a.item));
        items.sort_by_key(|i| i.seq);
        self.tasks.shutdown().await;
        self.task_ids.clear();

        let entries: Vec<SnapshotItem> = items.iter().map(SnapshotItem::from).collect();
        let saved = match &self.snapshot {
            Some(snapshot) if !entries.is_empty() => match snapshot.save(entries).await {
                Ok(n) => {
                    info!("Saved {} unfinished item(s) to the queue snapshot", n);
                    n
                }
                Err(e) => {
                    warn!("Could not save queue snapshot: {}", e);
                    0
                }
            },
            _ => 0,
        };

        for item in items {
            item.fail(DispatchError::Shutdown);
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::WorkRequest;
    use crate::rate_limit::RateLimitConfig;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl WorkHandler for Idle {
        async fn handle(
            &self,
            _request: &WorkRequest,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, AnalysisError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn runner() -> Runner {
        Runner {
            config: DispatcherConfig::default(),
            limiter: RateLimiter::new(RateLimitConfig::default()),
            handler: Arc::new(Idle),
            snapshot: None,
            queue: VecDeque::new(),
            active: HashMap::new(),
            tasks: JoinSet::new(),
            task_ids: HashMap::new(),
            next_seq: 0,
        }
    }

    fn item(id: &str, identity: &str, not_before: Option<Instant>) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            seq: 0,
            kind: WorkKind::Analysis,
            identity: identity.to_string(),
            payload: serde_json::Value::Null,
            attempts: 1,
            enqueued_at: Utc::now(),
            not_before,
            cancelled: false,
            on_complete: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_follows_backoff_of_first_item() {
        let mut runner = runner();
        let backoff = Instant::now() + Duration::from_secs(5);
        runner.push(item("retry", "ada", Some(backoff)));
        runner.push(item("later", "ada", None));

        runner.dispatch_ready();
        assert_eq!(runner.status().queued, 2);
        assert_eq!(runner.next_wake(), Some(backoff));

        runner.push(item("other", "grace", Some(Instant::now() + Duration::from_secs(2))));
        assert_eq!(runner.next_wake(), Some(Instant::now() + Duration::from_secs(2)));
    }
}
