//! C3 — two-stage async pipeline: schedule queue -> policy -> dispatch queue -> callback.
//!
//! Grounded on the scheduler's condvar producer/consumer description, mapped
//! per the redesign note to `tokio::sync::mpsc` channels and
//! `tokio::task::spawn` tasks in place of raw threads + condvars.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{DeployMode, DynamicInfo, Request, RoutingDecision, StaticInfo, WorkerId};
use crate::node_store::NodeStore;
use crate::policies::RoutingPolicy;

type SingleCallback = Box<dyn Fn(String, WorkerId) + Send + Sync>;
type PairCallback = Box<dyn Fn(String, WorkerId, WorkerId) + Send + Sync>;

struct DispatchItem {
    request_id: String,
    decision: RoutingDecision,
}

/// Adapts an async caller API (`submit` returns immediately) to the internal
/// two-stage pipeline. `Start`/`Stop` are idempotent and safe to call from
/// any task.
pub struct Scheduler {
    store: Arc<NodeStore>,
    policy: Arc<RwLock<Option<Arc<dyn RoutingPolicy>>>>,
    mode: DeployMode,
    /// Checked at the top of every worker loop iteration; `stop()` clears it
    /// before awaiting the task handles so a worker blocked on `recv()`
    /// between a closed-channel check and the next poll still observes the
    /// shutdown rather than spinning forever.
    active: AtomicBool,
    schedule_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Request>>>,
    schedule_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    dispatch_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<DispatchItem>>>,
    dispatch_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<DispatchItem>>>,
    single_callback: RwLock<Option<SingleCallback>>,
    pair_callback: RwLock<Option<PairCallback>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<NodeStore>, mode: DeployMode) -> Arc<Self> {
        let (schedule_tx, schedule_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            store,
            policy: Arc::new(RwLock::new(None)),
            mode,
            active: AtomicBool::new(false),
            schedule_tx: parking_lot::Mutex::new(Some(schedule_tx)),
            schedule_rx: parking_lot::Mutex::new(Some(schedule_rx)),
            dispatch_tx: parking_lot::Mutex::new(Some(dispatch_tx)),
            dispatch_rx: parking_lot::Mutex::new(Some(dispatch_rx)),
            single_callback: RwLock::new(None),
            pair_callback: RwLock::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn set_policy(&self, policy: Arc<dyn RoutingPolicy>) {
        *self.policy.write() = Some(policy);
    }

    pub fn register_single_callback<F>(&self, callback: F)
    where
        F: Fn(String, WorkerId) + Send + Sync + 'static,
    {
        *self.single_callback.write() = Some(Box::new(callback));
    }

    pub fn register_pair_callback<F>(&self, callback: F)
    where
        F: Fn(String, WorkerId, WorkerId) + Send + Sync + 'static,
    {
        *self.pair_callback.write() = Some(Box::new(callback));
    }

    pub fn register(&self, instances: Vec<StaticInfo>) {
        self.store.register(instances);
    }

    pub fn remove(&self, ids: &[WorkerId]) {
        self.store.remove(ids);
    }

    pub fn update(&self, instances: Vec<(WorkerId, DynamicInfo)>) {
        self.store.update(instances);
    }

    /// Enqueues a request; returns immediately. A no-op (with a warning) once
    /// `stop()` has torn down the schedule channel.
    pub fn submit(&self, request: Request) {
        let sent = match self.schedule_tx.lock().as_ref() {
            Some(sender) => sender.send(request).is_ok(),
            None => false,
        };
        if !sent {
            warn!("schedule channel closed, dropping submission");
        }
    }

    /// Spawns the schedule-worker and dispatch-worker tasks. Idempotent: a
    /// second call on an already-started scheduler is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        self.active.store(true, Ordering::SeqCst);
        if let Some(rx) = self.schedule_rx.lock().take() {
            let this = self.clone();
            tasks.push(tokio::task::spawn(this.schedule_worker(rx)));
        }
        if let Some(rx) = self.dispatch_rx.lock().take() {
            let this = self.clone();
            tasks.push(tokio::task::spawn(this.dispatch_worker(rx)));
        }
    }

    /// Clears the active flag, drops both channels' sending halves so any
    /// worker parked in `recv()` observes a closed channel, then awaits both
    /// task joins. Safe to call from any task.
    pub async fn stop(self: &Arc<Self>) {
        self.active.store(false, Ordering::SeqCst);
        self.schedule_tx.lock().take();
        self.dispatch_tx.lock().take();
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn schedule_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Request>) {
        while self.active.load(Ordering::SeqCst) {
            let Some(request) = rx.recv().await else {
                break;
            };
            let policy = self.policy.read().clone();
            let Some(policy) = policy else {
                warn!(request_id = %request.id, "no policy configured, re-queueing");
                self.submit(request);
                continue;
            };
            match policy.pick(&self.store, self.mode, request.request_type, &request.body) {
                Ok(decision) => {
                    let item = DispatchItem {
                        request_id: request.id,
                        decision,
                    };
                    let sent = match self.dispatch_tx.lock().as_ref() {
                        Some(sender) => sender.send(item).is_ok(),
                        None => false,
                    };
                    if !sent {
                        warn!("dispatch channel closed, dropping routed request");
                    }
                }
                Err(err) if err.is_retryable_in_scheduler() => {
                    debug!(request_id = %request.id, error = %err, "no worker available, re-queueing");
                    self.submit(request);
                }
                Err(err) => {
                    warn!(request_id = %request.id, error = %err, code = %err.code(), "policy failed fatally, dropping request");
                }
            }
        }
    }

    async fn dispatch_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<DispatchItem>) {
        while self.active.load(Ordering::SeqCst) {
            let Some(item) = rx.recv().await else {
                break;
            };
            match item.decision {
                RoutingDecision::Single(worker) => {
                    let callback = self.single_callback.read();
                    match callback.as_ref() {
                        Some(cb) => cb(item.request_id, worker),
                        None => warn!(request_id = %item.request_id, "no single callback registered"),
                    }
                }
                RoutingDecision::Pair(p, d) => {
                    let callback = self.pair_callback.read();
                    match callback.as_ref() {
                        Some(cb) => cb(item.request_id, p, d),
                        None => warn!(request_id = %item.request_id, "no pair callback registered"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RequestBody, RequestType, WorkerRole};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn dispatches_in_submission_order_when_policy_never_retries() {
        let store = Arc::new(NodeStore::new());
        store.register(vec![StaticInfo {
            id: WorkerId(1),
            role: WorkerRole::Undefined,
            label: "w".into(),
            max_seq_len: 1,
            max_output_len: 1,
            total_slots: 10,
            total_blocks: 10,
            block_size: 1,
        }]);
        store.update(vec![(
            WorkerId(1),
            DynamicInfo {
                avail_slots: 10,
                avail_blocks: 10,
                peers: vec![],
            },
        )]);

        let scheduler = Scheduler::new(store, DeployMode::SingleNode);
        scheduler.set_policy(Arc::new(crate::policies::RoundRobinPolicy::new()));

        let seen: StdArc<std::sync::Mutex<Vec<String>>> = StdArc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let counter = StdArc::new(AtomicU64::new(0));
        let counter_clone = counter.clone();
        scheduler.register_single_callback(move |req_id, _worker| {
            seen_clone.lock().unwrap().push(req_id);
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.start();
        scheduler.submit(Request {
            id: "a".into(),
            request_type: RequestType::Raw,
            body: RequestBody::Text(String::new()),
        });
        scheduler.submit(Request {
            id: "b".into(),
            request_type: RequestType::Raw,
            body: RequestBody::Text(String::new()),
        });

        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_after_start_with_no_submissions() {
        let store = Arc::new(NodeStore::new());
        let scheduler = Scheduler::new(store, DeployMode::SingleNode);
        scheduler.set_policy(Arc::new(crate::policies::RoundRobinPolicy::new()));
        scheduler.start();

        tokio::time::timeout(std::time::Duration::from_secs(5), scheduler.stop())
            .await
            .expect("stop() must return once the channels are torn down");
    }
}
