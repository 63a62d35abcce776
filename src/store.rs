//! Metrics store: the selected dataset, its loaded metrics, and load status,
//! republished to every subscriber on each transition.
//!
//! ```text
//!            select(id)              load ok (possibly degraded)
//!   Idle ──────────────► Loading ─────────────────────────────► Ready
//!                          │  ▲                                   │
//!                          │  └──────────── select(other) ────────┤
//!                          │ load err                             │
//!                          ▼                                      │
//!                        Error ◄──────────── select(other) ───────┘
//!
//!   any phase ── dispose() ──► Disposed
//! ```
//!
//! Every selection bumps a generation counter. A load that completes with a
//! stale generation is dropped, so the last selection wins regardless of
//! which load finishes first.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::loader::{CombinedMetrics, LoadReport, LoadedDataset, MetricsLoader};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::registry::{DatasetDescriptor, DatasetId, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Error,
    /// Terminal; no further loads
    Disposed,
}

impl LoadPhase {
    fn rank(self) -> u8 {
        match self {
            LoadPhase::Idle => 0,
            LoadPhase::Loading => 1,
            LoadPhase::Ready | LoadPhase::Error => 2,
            LoadPhase::Disposed => 3,
        }
    }
}

/// What subscribers see. `metrics` is `None` until the current selection
/// is ready; that means "no data yet", not failure.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub dataset_id: DatasetId,
    pub phase: LoadPhase,
    pub metrics: Option<Arc<CombinedMetrics>>,
    pub report: Option<Arc<LoadReport>>,
    pub error: Option<String>,
    pub generation: u64,
}

impl StoreSnapshot {
    fn idle(dataset_id: DatasetId) -> Self {
        Self {
            dataset_id,
            phase: LoadPhase::Idle,
            metrics: None,
            report: None,
            error: None,
            generation: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.phase, LoadPhase::Ready | LoadPhase::Error | LoadPhase::Disposed)
    }

    /// Orders snapshots of one store: later selections, then later phases.
    fn delivery_key(&self) -> (u64, u8) {
        (self.generation, self.phase.rank())
    }
}

pub type Listener = Arc<dyn Fn(&StoreSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    registry: Arc<Registry>,
    loader: Arc<dyn MetricsLoader>,
    runtime: Handle,
    state: watch::Sender<StoreSnapshot>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_listener: AtomicU64,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    /// Key of the newest snapshot handed to listeners
    last_delivered: Mutex<(u64, u8)>,
    disposed: AtomicBool,
}

/// Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct MetricsStore {
    inner: Arc<Inner>,
}

impl MetricsStore {
    /// Create the store and start loading `initial`.
    ///
    /// Must be called from within a tokio runtime; loads are spawned on it.
    pub fn create(initial: DatasetId, registry: Arc<Registry>, loader: Arc<dyn MetricsLoader>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| anyhow!("metrics store needs a tokio runtime: {}", e))?;
        let (state, _) = watch::channel(StoreSnapshot::idle(initial.clone()));
        let store = Self {
            inner: Arc::new(Inner {
                registry,
                loader,
                runtime,
                state,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                in_flight: Mutex::new(None),
                last_delivered: Mutex::new((0, 0)),
                disposed: AtomicBool::new(false),
            }),
        };
        store.begin_load(initial);
        Ok(store)
    }

    pub fn current(&self) -> StoreSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.inner.state.borrow().dataset_id.clone()
    }

    pub fn metrics(&self) -> Option<Arc<CombinedMetrics>> {
        self.inner.state.borrow().metrics.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    /// Descriptor of the selected dataset; `None` for an id the registry lacks.
    pub fn descriptor(&self) -> Option<DatasetDescriptor> {
        self.inner.registry.get(&self.dataset_id()).cloned()
    }

    pub fn datasets(&self) -> &[DatasetDescriptor] {
        self.inner.registry.datasets()
    }

    /// Switch datasets. Re-selecting the current id does nothing.
    pub fn select(&self, id: impl Into<DatasetId>) {
        let id = id.into();
        if self.inner.state.borrow().dataset_id == id {
            return;
        }
        self.begin_load(id);
    }

    /// Load the current dataset again.
    pub fn reload(&self) {
        self.begin_load(self.dataset_id());
    }

    /// Call `listener` on every transition. Deliveries arrive in state order;
    /// one that would be older than a snapshot already delivered is dropped.
    pub fn subscribe(&self, listener: impl Fn(&StoreSnapshot) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(sid, _)| *sid != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.state.subscribe()
    }

    /// Wait until the current selection is ready or failed, or the store
    /// is disposed.
    pub async fn settled(&self) -> StoreSnapshot {
        let mut rx = self.watch();
        if let Ok(snapshot) = rx.wait_for(|s| s.is_settled()).await {
            return snapshot.clone();
        }
        self.current()
    }

    /// Stop loading, publish `Disposed`, drop listeners, ignore later
    /// selections.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            if let Some(handle) = in_flight.take() {
                handle.abort();
            }
        }
        self.inner.publish(|s| {
            s.phase = LoadPhase::Disposed;
            s.metrics = None;
            s.report = None;
            true
        });
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.clear();
        }
        log(
            Level::Info,
            Domain::Store,
            "disposed",
            obj(&[("dataset", v_str(self.dataset_id().as_str()))]),
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn begin_load(&self, id: DatasetId) {
        if self.is_disposed() {
            log(
                Level::Warn,
                Domain::Store,
                "select_after_dispose",
                obj(&[("dataset", v_str(id.as_str()))]),
            );
            return;
        }

        let mut generation = 0;
        self.inner.publish(|s| {
            s.generation += 1;
            generation = s.generation;
            s.dataset_id = id.clone();
            s.phase = LoadPhase::Loading;
            s.metrics = None;
            s.report = None;
            s.error = None;
            true
        });
        log(
            Level::Info,
            Domain::Store,
            "loading",
            obj(&[("dataset", v_str(id.as_str())), ("generation", v_num(generation as f64))]),
        );

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let loader = self.inner.loader.clone();
        let handle = self.inner.runtime.spawn(async move {
            let result = loader.load(&id).await;
            if let Some(inner) = weak.upgrade() {
                inner.complete(generation, &id, result);
            }
        });

        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            // Superseded loads run to completion and are discarded by generation.
            *in_flight = Some(handle);
        }
    }
}

impl Inner {
    fn complete(&self, generation: u64, id: &DatasetId, result: Result<LoadedDataset>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let current = self.state.borrow().generation;
        if current != generation {
            log(
                Level::Debug,
                Domain::Store,
                "stale_load_discarded",
                obj(&[
                    ("dataset", v_str(id.as_str())),
                    ("generation", v_num(generation as f64)),
                    ("current_generation", v_num(current as f64)),
                ]),
            );
            return;
        }

        match result {
            Ok(loaded) => {
                let degraded = loaded.report.is_degraded();
                self.publish(|s| {
                    if s.generation != generation {
                        return false;
                    }
                    s.phase = LoadPhase::Ready;
                    s.metrics = Some(Arc::new(loaded.metrics));
                    s.report = Some(Arc::new(loaded.report));
                    s.error = None;
                    true
                });
                log(
                    Level::Info,
                    Domain::Store,
                    "ready",
                    obj(&[
                        ("dataset", v_str(id.as_str())),
                        ("degraded", serde_json::Value::Bool(degraded)),
                    ]),
                );
            }
            Err(err) => {
                let message = err.to_string();
                log(
                    Level::Error,
                    Domain::Store,
                    "load_failed",
                    obj(&[("dataset", v_str(id.as_str())), ("error", v_str(&message))]),
                );
                self.publish(|s| {
                    if s.generation != generation {
                        return false;
                    }
                    s.phase = LoadPhase::Error;
                    s.metrics = None;
                    s.report = None;
                    s.error = Some(message);
                    true
                });
            }
        }
    }

    /// Apply `modify`; if it reports a change, notify receivers and listeners.
    fn publish(&self, modify: impl FnOnce(&mut StoreSnapshot) -> bool) {
        if !self.state.send_if_modified(modify) {
            return;
        }
        let snapshot = self.state.borrow().clone();
        self.notify(&snapshot);
    }

    /// Hand `snapshot` to listeners unless a newer one already went out.
    fn notify(&self, snapshot: &StoreSnapshot) {
        let key = snapshot.delivery_key();
        match self.last_delivered.lock() {
            Ok(mut last) if key > *last => *last = key,
            Ok(_) => {
                log(
                    Level::Debug,
                    Domain::Store,
                    "stale_delivery_skipped",
                    obj(&[
                        ("dataset", v_str(snapshot.dataset_id.as_str())),
                        ("generation", v_num(snapshot.generation as f64)),
                    ]),
                );
                return;
            }
            Err(_) => return,
        }
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Loader that sleeps per dataset, then returns empty metrics.
    struct DelayLoader;

    #[async_trait]
    impl MetricsLoader for DelayLoader {
        async fn load(&self, id: &DatasetId) -> Result<LoadedDataset> {
            let delay = if id.as_str() == "slow" { 150 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if id.as_str() == "broken" {
                return Err(anyhow!("unknown dataset: broken"));
            }
            Ok(LoadedDataset {
                dataset_id: id.clone(),
                metrics: CombinedMetrics::default(),
                report: LoadReport::default(),
            })
        }
    }

    fn store(initial: &str) -> MetricsStore {
        MetricsStore::create(initial.into(), Arc::new(Registry::builtin()), Arc::new(DelayLoader)).unwrap()
    }

    #[tokio::test]
    async fn starts_loading_then_ready() {
        let s = store("cifar10");
        assert!(s.is_loading());
        assert!(s.metrics().is_none());
        let snap = s.settled().await;
        assert_eq!(snap.phase, LoadPhase::Ready);
        assert!(snap.metrics.is_some());
        assert!(snap.error.is_none());
        assert_eq!(s.descriptor().unwrap().name, "CIFAR-10");
    }

    #[tokio::test]
    async fn failure_sets_error_and_no_metrics() {
        let s = store("broken");
        let snap = s.settled().await;
        assert_eq!(snap.phase, LoadPhase::Error);
        assert!(snap.metrics.is_none());
        assert!(snap.error.unwrap().contains("broken"));
        assert!(s.descriptor().is_none());
    }

    #[tokio::test]
    async fn reselecting_current_id_is_a_noop() {
        let s = store("cifar10");
        s.settled().await;
        let before = s.current().generation;
        s.select("cifar10");
        assert_eq!(s.current().generation, before);
        assert_eq!(s.current().phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn reload_re_enters_loading() {
        let s = store("cifar10");
        s.settled().await;
        s.reload();
        assert!(s.is_loading());
        assert!(s.metrics().is_none());
        assert_eq!(s.settled().await.phase, LoadPhase::Ready);
    }

    #[tokio::test]
    async fn listeners_see_each_transition() {
        let s = store("cifar10");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = s.subscribe(move |snap| sink.lock().unwrap().push((snap.dataset_id.clone(), snap.phase)));
        s.settled().await;
        s.select("caltech256");
        s.settled().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (DatasetId::from("cifar10"), LoadPhase::Ready),
                (DatasetId::from("caltech256"), LoadPhase::Loading),
                (DatasetId::from("caltech256"), LoadPhase::Ready),
            ]
        );
        assert!(s.unsubscribe(sub));
        assert!(!s.unsubscribe(sub));
    }

    #[tokio::test]
    async fn dispose_ignores_later_selections() {
        let s = store("slow");
        s.dispose();
        s.select("cifar10");
        assert!(s.is_disposed());
        assert_eq!(s.dataset_id(), DatasetId::from("slow"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(s.current().phase, LoadPhase::Disposed);
        assert!(!s.is_loading());
        assert!(s.metrics().is_none());
    }

    #[tokio::test]
    async fn dispose_releases_settled_waiters() {
        let s = store("slow");
        let waiter = tokio::spawn({
            let s = s.clone();
            async move { s.settled().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        s.dispose();

        let snap = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("settled() should return after dispose")
            .unwrap();
        assert_eq!(snap.phase, LoadPhase::Disposed);
        assert!(snap.metrics.is_none());
    }

    #[tokio::test]
    async fn listeners_never_receive_an_older_snapshot() {
        let s = store("cifar10");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.subscribe(move |snap| sink.lock().unwrap().push((snap.generation, snap.phase)));

        let loading = s.current();
        s.settled().await;
        s.select("caltech256");
        let ready = s.settled().await;

        // A late delivery of the first selection's loading state is dropped.
        s.inner.notify(&loading);
        s.inner.notify(&ready);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(1, LoadPhase::Ready), (2, LoadPhase::Loading), (2, LoadPhase::Ready)]
        );
    }
}
