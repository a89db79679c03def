//! Main controller implementation.
//!
//! Bootstrap fetches this agent's own Node or Vm, then wires the change
//! feeds, filters and reconcilers of the selected mode around one work
//! queue:
//! - cluster mode: Pod, Node, LogConfig, ClusterLogConfig, Sink, Interceptor
//! - fleet mode: Vm, ClusterLogConfig, Sink, Interceptor
//!
//! `run` waits for every cache to sync, then starts the single worker and
//! keeps it alive until shutdown.

use crate::backoff::ControllerRateLimiter;
use crate::config::Config;
use crate::dispatch::DispatchTable;
use crate::element::{Element, ElementKind};
use crate::error::ControllerError;
use crate::filter::{ConfigFilter, PodFilter, VersionedFilter, VmFilter};
use crate::identity::{IdentityFetcher, KubeIdentity, resolve_identity};
use crate::index::{IndexKind, MatchIndex};
use crate::informer::{FeedRegistrar, KubeFeeds, sync_barrier};
use crate::metrics::Metrics;
use crate::pattern::FieldPatterns;
use crate::probes::ProbeState;
use crate::queue::WorkQueue;
use crate::reconcile_helpers::Ownership;
use crate::reconciler::{ConfigReconciler, PodReconciler, ReconcileContext, ReferenceReconciler, SelfReconciler};
use crate::topology::{ClusterTopology, FleetTopology, SharedListers, Topology};
use crate::worker::Worker;
use crds::{ClusterLogConfig, Interceptor, LogConfig, Sink, Vm};
use futures::future::{BoxFuture, try_join_all};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Client;
use kube_runtime::watcher;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Name of the work queue, also used as the metrics label.
pub const QUEUE_NAME: &str = "logConfig";

/// Delay before a panicked worker is restarted.
const WORKER_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Everything bootstrap builds before background tasks are attached.
pub struct Wiring {
    pub queue: WorkQueue<Element>,
    pub dispatch: Arc<DispatchTable>,
    pub context: Arc<ReconcileContext>,
    pub metrics: Metrics,
    pub barriers: Vec<BoxFuture<'static, Result<(), ControllerError>>>,
}

/// Builds the controller state for the configured mode.
///
/// The identity lookup happens first; when it fails nothing is registered.
pub async fn bootstrap<R: FeedRegistrar>(
    config: &Config,
    fetcher: &dyn IdentityFetcher,
    registrar: &mut R,
) -> Result<Wiring, ControllerError> {
    let identity = resolve_identity(fetcher, &config.node_name, config.vm_mode).await?;

    let metrics = Metrics::new(QUEUE_NAME)?;
    let queue = WorkQueue::new(QUEUE_NAME, ControllerRateLimiter::from_config(&config.retry), metrics.clone());
    let ownership = Ownership::new(config.cluster.clone());
    let patterns = FieldPatterns::compile(config);
    let mut barriers = Vec::new();

    info!("Setting up event handlers");
    let own_name = watcher::Config::default().fields(&format!("metadata.name={}", config.node_name));

    let topology = if config.vm_mode {
        let vms = registrar.subscribe::<Vm, _>(own_name, VmFilter, &queue);
        barriers.push(sync_barrier(vms.clone()));
        Topology::Fleet(FleetTopology {
            vms,
            node_index: MatchIndex::new(IndexKind::Node),
        })
    } else {
        let on_this_node = watcher::Config::default().fields(&format!("spec.nodeName={}", config.node_name));
        let pods = registrar.subscribe::<Pod, _>(on_this_node, PodFilter, &queue);
        let nodes = registrar.subscribe::<Node, _>(own_name, VersionedFilter::node(), &queue);
        let log_configs =
            registrar.subscribe::<LogConfig, _>(watcher::Config::default(), ConfigFilter::new(ownership.clone()), &queue);
        barriers.push(sync_barrier(pods.clone()));
        barriers.push(sync_barrier(nodes.clone()));
        barriers.push(sync_barrier(log_configs.clone()));
        Topology::Cluster(ClusterTopology {
            pods,
            nodes,
            log_configs,
            pod_index: MatchIndex::new(IndexKind::Pod),
            cluster_index: MatchIndex::new(IndexKind::Cluster),
            node_index: MatchIndex::new(IndexKind::Node),
        })
    };

    let shared = SharedListers {
        cluster_log_configs: registrar.subscribe::<ClusterLogConfig, _>(
            watcher::Config::default(),
            ConfigFilter::new(ownership.clone()),
            &queue,
        ),
        sinks: registrar.subscribe::<Sink, _>(watcher::Config::default(), VersionedFilter::sink(), &queue),
        interceptors: registrar.subscribe::<Interceptor, _>(
            watcher::Config::default(),
            VersionedFilter::interceptor(),
            &queue,
        ),
    };
    barriers.push(sync_barrier(shared.cluster_log_configs.clone()));
    barriers.push(sync_barrier(shared.sinks.clone()));
    barriers.push(sync_barrier(shared.interceptors.clone()));

    let context = Arc::new(ReconcileContext {
        topology,
        shared,
        identity,
        ownership,
        patterns,
    });
    let dispatch = Arc::new(dispatch_table(&context));
    info!(
        "Controller wired in {} mode for {:?}",
        context.topology.mode(),
        dispatch.kinds().iter().map(|k| k.as_str()).collect::<Vec<_>>()
    );

    Ok(Wiring {
        queue,
        dispatch,
        context,
        metrics,
        barriers,
    })
}

/// Routes every kind watched in the context's mode.
fn dispatch_table(ctx: &Arc<ReconcileContext>) -> DispatchTable {
    let references = Arc::new(ReferenceReconciler::new(Arc::clone(ctx)));
    let table = DispatchTable::new()
        .route(
            ElementKind::ClusterLogConfig,
            Arc::new(ConfigReconciler::<ClusterLogConfig>::new(Arc::clone(ctx))),
        )
        .route(ElementKind::Sink, references.clone())
        .route(ElementKind::Interceptor, references);

    match &ctx.topology {
        Topology::Cluster(_) => table
            .route(ElementKind::Pod, Arc::new(PodReconciler::new(Arc::clone(ctx))))
            .route(ElementKind::Node, Arc::new(SelfReconciler::new(Arc::clone(ctx))))
            .route(
                ElementKind::LogConfig,
                Arc::new(ConfigReconciler::<LogConfig>::new(Arc::clone(ctx))),
            ),
        Topology::Fleet(_) => table.route(ElementKind::Vm, Arc::new(SelfReconciler::new(Arc::clone(ctx)))),
    }
}

/// The discovery controller.
pub struct Controller {
    queue: WorkQueue<Element>,
    worker: Worker,
    barriers: Vec<BoxFuture<'static, Result<(), ControllerError>>>,
    feeds: Vec<JoinHandle<()>>,
    probes: ProbeState,
}

impl Controller {
    /// Fetches this agent's identity and starts the change feeds.
    pub async fn new(client: Client, config: &Config) -> Result<Self, ControllerError> {
        info!("Initializing discovery controller");
        let identity = KubeIdentity::new(client.clone());
        let mut feeds = KubeFeeds::new(client);
        let wiring = bootstrap(config, &identity, &mut feeds).await?;
        Ok(Self::from_wiring(wiring, feeds.into_tasks()))
    }

    pub fn from_wiring(wiring: Wiring, feeds: Vec<JoinHandle<()>>) -> Self {
        let worker = Worker::new(wiring.queue.clone(), wiring.dispatch, wiring.metrics.clone());
        Self {
            queue: wiring.queue,
            worker,
            barriers: wiring.barriers,
            feeds,
            probes: ProbeState::new(wiring.metrics),
        }
    }

    /// State for the probe server.
    pub fn probe_state(&self) -> ProbeState {
        self.probes.clone()
    }

    /// Runs until `shutdown` resolves.
    ///
    /// Fails without starting the worker if shutdown arrives or a cache
    /// writer goes away before every cache has synced.
    pub async fn run<S>(self, shutdown: S) -> Result<(), ControllerError>
    where
        S: Future<Output = ()> + Send,
    {
        let Self {
            queue,
            worker,
            barriers,
            feeds,
            probes,
        } = self;
        tokio::pin!(shutdown);

        info!("Starting controller");
        info!("Waiting for informer caches to sync");
        let synced = tokio::select! {
            result = try_join_all(barriers) => result.map(|_| ()),
            () = &mut shutdown => Err(ControllerError::CacheSync("shutdown requested".to_string())),
        };
        if let Err(e) = synced {
            queue.shut_down();
            abort_all(&feeds);
            return Err(e);
        }
        probes.set_ready(true);

        info!("Starting kubernetes discovery workers");
        let supervisor = tokio::spawn(supervise(worker, queue.clone()));

        shutdown.await;
        info!("Shutting down kubernetes discovery workers");
        probes.set_ready(false);
        queue.shut_down();

        // The element in flight, if any, finishes before the worker exits
        if let Err(e) = supervisor.await {
            error!("Worker supervisor failed: {}", e);
        }
        abort_all(&feeds);
        Ok(())
    }
}

fn abort_all(feeds: &[JoinHandle<()>]) {
    for feed in feeds {
        feed.abort();
    }
}

/// Keeps one worker running, restarting it after a panic.
async fn supervise(worker: Worker, queue: WorkQueue<Element>) {
    loop {
        let current = worker.clone();
        match tokio::spawn(async move { current.run().await }).await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                if queue.is_shutting_down() {
                    return;
                }
                warn!("Worker panicked, restarting in {:?}", WORKER_RESTART_DELAY);
                tokio::time::sleep(WORKER_RESTART_DELAY).await;
            }
            Err(e) => {
                error!("Worker task failed: {}", e);
                return;
            }
        }
    }
}
