use std::{fmt::Debug, sync::Arc};

use futures::StreamExt;
use kube::{
    api::DynamicObject,
    runtime::{watcher, watcher::Event, WatchStreamExt},
    Api, Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    api::{convert, APIObject, RemotePodDisruptionBudget},
    client::KubeClient,
    controller::{
        disruption_budget::keys_for_budget, Controller, DisruptionBudgetController,
    },
    error::{Error, Result},
    events::{EventPublisher, KubeEventPublisher},
    executor::{BudgetClient, Executor},
    queue::{Backoff, WorkQueue},
    resources::{Meta, ObjectKey, PodDisruptionBudget, VirtualMachineInstance},
    state::{Resources, StateView},
};

pub type SharedState = Arc<RwLock<StateView>>;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of keys reconciled concurrently.
    pub workers: usize,
    /// Restrict watches to one namespace, all namespaces otherwise.
    pub namespace: Option<String>,
    /// Reporting component of emitted events.
    pub controller_name: String,
    pub backoff: Backoff,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            namespace: None,
            controller_name: "disruptionbudget-controller".to_owned(),
            backoff: Backoff::default(),
        }
    }
}

/// A resource kept in the local cache.
pub trait Cached: Meta + Clone + Debug + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    fn cache(view: &StateView) -> &Resources<Self>;

    fn cache_mut(view: &mut StateView) -> &mut Resources<Self>;

    /// Queue keys that need reconciling when this object changes.
    fn affected_keys(&self, view: &StateView) -> Vec<ObjectKey>;
}

impl Cached for VirtualMachineInstance {
    const KIND: &'static str = "VirtualMachineInstance";

    fn cache(view: &StateView) -> &Resources<Self> {
        &view.instances
    }

    fn cache_mut(view: &mut StateView) -> &mut Resources<Self> {
        &mut view.instances
    }

    fn affected_keys(&self, _view: &StateView) -> Vec<ObjectKey> {
        vec![self.key()]
    }
}

impl Cached for PodDisruptionBudget {
    const KIND: &'static str = "PodDisruptionBudget";

    fn cache(view: &StateView) -> &Resources<Self> {
        &view.budgets
    }

    fn cache_mut(view: &mut StateView) -> &mut Resources<Self> {
        &mut view.budgets
    }

    fn affected_keys(&self, view: &StateView) -> Vec<ObjectKey> {
        keys_for_budget(view, self)
    }
}

/// Fold a watch event into the cache, returning the keys to enqueue.
///
/// Both the previous and the new version of an object contribute keys so that a budget moving
/// away from an instance still triggers that instance.
pub fn apply_event<L: Cached>(view: &mut StateView, event: Event<L>) -> Vec<ObjectKey> {
    let mut keys = Vec::new();
    match event {
        Event::Applied(obj) => {
            let old = L::cache_mut(view).upsert(obj.clone());
            if let Some(old) = old {
                keys.extend(old.affected_keys(view));
            }
            keys.extend(obj.affected_keys(view));
        }
        Event::Deleted(obj) => {
            let old = L::cache_mut(view).remove(&obj.key());
            if let Some(old) = old {
                keys.extend(old.affected_keys(view));
            }
            keys.extend(obj.affected_keys(view));
        }
        Event::Restarted(objs) => {
            let old = std::mem::replace(L::cache_mut(view), objs.into_iter().collect());
            for obj in old.iter() {
                keys.extend(obj.affected_keys(view));
            }
            for obj in L::cache(view).iter() {
                keys.extend(obj.affected_keys(view));
            }
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

fn to_local<R, L>(event: Event<R>) -> Option<Event<L>>
where
    R: Serialize,
    L: Cached,
{
    let one = |obj: &R| match convert::<R, L>(obj, L::KIND) {
        Ok(local) => Some(local),
        Err(error) => {
            warn!(kind = L::KIND, %error, "Skipping object that failed to convert");
            None
        }
    };
    match event {
        Event::Applied(obj) => one(&obj).map(Event::Applied),
        Event::Deleted(obj) => one(&obj).map(Event::Deleted),
        Event::Restarted(objs) => Some(Event::Restarted(objs.iter().filter_map(one).collect())),
    }
}

/// Mirror one resource type into the shared state, enqueueing affected keys.
///
/// `synced` fires after the first complete listing.
async fn watch<R, L>(
    api: Api<R>,
    state: SharedState,
    queue: WorkQueue,
    synced: oneshot::Sender<()>,
) where
    R: Resource + Clone + Debug + DeserializeOwned + Serialize + Send + 'static,
    L: Cached,
{
    info!(kind = L::KIND, "Starting watch");
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    let mut synced = Some(synced);
    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!(kind = L::KIND, %error, "Watch error");
                continue;
            }
        };
        let restarted = matches!(event, Event::Restarted(_));
        let Some(event) = to_local::<R, L>(event) else {
            continue;
        };
        let keys = {
            let mut view = state.write().await;
            apply_event(&mut view, event)
        };
        debug!(kind = L::KIND, keys = keys.len(), "Cache updated");
        for key in keys {
            queue.enqueue(key);
        }
        if restarted {
            if let Some(synced) = synced.take() {
                info!(kind = L::KIND, "Cache synced");
                let _ = synced.send(());
            }
        }
    }
    warn!(kind = L::KIND, "Watch ended");
}

/// Pulls keys off the queue and reconciles them one at a time.
pub struct Dispatcher<C, P> {
    controller: DisruptionBudgetController,
    state: SharedState,
    queue: WorkQueue,
    executor: Executor<C, P>,
}

impl<C: BudgetClient, P: EventPublisher> Dispatcher<C, P> {
    pub fn new(state: SharedState, queue: WorkQueue, executor: Executor<C, P>) -> Self {
        Self {
            controller: DisruptionBudgetController,
            state,
            queue,
            executor,
        }
    }

    /// Decide and execute the plan for one key against a snapshot of the cache.
    #[instrument(skip_all, fields(%key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let snapshot = self.state.read().await.clone();
        let plan = self.controller.step(key, &snapshot)?;
        if plan.is_empty() {
            debug!("Nothing to do");
            return Ok(());
        }
        debug!(actions = plan.len(), "Executing plan");
        self.executor.execute(key, plan).await
    }

    /// Handle the next queued key. Returns `None` once the queue is shut down.
    pub async fn process_next(&self) -> Option<Result<()>> {
        let key = self.queue.next().await?;
        let result = self.reconcile(&key).await;
        match &result {
            Ok(()) => self.queue.forget(&key),
            Err(error) => {
                let failures = self.queue.failures(&key);
                if error.is_invariant() {
                    error!(%key, %error, failures, "Reconcile hit a broken invariant, requeueing");
                } else {
                    warn!(%key, %error, failures, "Reconcile failed, requeueing");
                }
                self.queue.add_rate_limited(key.clone());
            }
        }
        self.queue.done(&key);
        Some(result)
    }

    pub async fn run_worker(&self, id: usize) {
        info!(id, controller = self.controller.name(), "Starting worker");
        while self.process_next().await.is_some() {}
        info!(id, controller = self.controller.name(), "Stopping worker");
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Run the controller until a shutdown signal arrives.
pub async fn run(client: Client, config: ControllerConfig) -> Result<()> {
    info!(?config, "Starting controller manager");
    let state = SharedState::default();
    let queue = WorkQueue::new(config.backoff);

    let instance_resource = VirtualMachineInstance::api_resource();
    let (instances, budgets): (Api<DynamicObject>, Api<RemotePodDisruptionBudget>) =
        match &config.namespace {
            Some(ns) => (
                Api::namespaced_with(client.clone(), ns, &instance_resource),
                Api::namespaced(client.clone(), ns),
            ),
            None => (
                Api::all_with(client.clone(), &instance_resource),
                Api::all(client.clone()),
            ),
        };

    let (instances_synced, instances_ready) = oneshot::channel();
    let (budgets_synced, budgets_ready) = oneshot::channel();
    let watchers = [
        tokio::spawn(watch::<DynamicObject, VirtualMachineInstance>(
            instances,
            Arc::clone(&state),
            queue.clone(),
            instances_synced,
        )),
        tokio::spawn(watch::<RemotePodDisruptionBudget, PodDisruptionBudget>(
            budgets,
            Arc::clone(&state),
            queue.clone(),
            budgets_synced,
        )),
    ];

    let synced = async {
        instances_ready
            .await
            .map_err(|_| Error::CacheSync(VirtualMachineInstance::KIND))?;
        budgets_ready
            .await
            .map_err(|_| Error::CacheSync(PodDisruptionBudget::KIND))?;
        Ok::<_, Error>(())
    };
    tokio::select! {
        res = synced => res?,
        _ = shutdown_signal() => {
            info!("Shutdown requested before caches synced");
            for w in &watchers {
                w.abort();
            }
            return Ok(());
        }
    }

    info!(workers = config.workers, "Caches synced, starting workers");
    let executor = Executor::new(
        KubeClient::new(client.clone()),
        KubeEventPublisher::new(client, &config.controller_name),
    );
    let dispatcher = Arc::new(Dispatcher::new(state, queue.clone(), executor));
    let workers: Vec<_> = (0..config.workers.max(1))
        .map(|id| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run_worker(id).await })
        })
        .collect();

    shutdown_signal().await;
    info!("Shutting down");
    queue.shut_down();
    for worker in workers {
        if let Err(error) = worker.await {
            error!(%error, "Worker panicked");
        }
    }
    for w in &watchers {
        w.abort();
    }
    info!("Controller manager stopped");
    Ok(())
}
