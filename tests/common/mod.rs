#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::error::ErrorResponse;
use tokio::sync::RwLock;
use vmi_disruption_budget::controller::{Controller, DisruptionBudgetController};
use vmi_disruption_budget::controller_manager::{Dispatcher, SharedState};
use vmi_disruption_budget::error::{Error, Result};
use vmi_disruption_budget::events::RecordingEventPublisher;
use vmi_disruption_budget::executor::{BudgetClient, Executor};
use vmi_disruption_budget::queue::WorkQueue;
use vmi_disruption_budget::resources::{
    EvictionStrategy, Meta, MigrationState, ObjectKey, PodDisruptionBudget,
    VirtualMachineInstance,
};
use vmi_disruption_budget::state::StateView;

pub const NAMESPACE: &str = "default";

pub fn live_migratable_instance(name: &str, uid: &str) -> VirtualMachineInstance {
    let mut vmi = VirtualMachineInstance::default();
    vmi.metadata.name = name.to_owned();
    vmi.metadata.namespace = NAMESPACE.to_owned();
    vmi.metadata.uid = uid.to_owned();
    vmi.metadata.resource_version = "1".to_owned();
    vmi.spec.eviction_strategy = Some(EvictionStrategy::LiveMigrate);
    vmi
}

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

pub fn migration(pending: bool, completed: bool, failed: bool) -> Option<MigrationState> {
    Some(MigrationState {
        pending,
        completed,
        failed,
    })
}

/// Budgets whose selector label carries `uid`.
pub fn budgets_bound_to(view: &StateView, uid: &str) -> Vec<PodDisruptionBudget> {
    view.budgets
        .iter()
        .filter(|b| b.selector_uid() == Some(uid))
        .cloned()
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Delete,
    UpdateInstance,
}

/// Stands in for the API server and the watch caches at once: every successful call mutates the
/// shared view the controller reads from.
#[derive(Debug)]
pub struct InMemoryCluster {
    state: SharedState,
    failures: Mutex<BTreeMap<Operation, usize>>,
    calls: Mutex<Vec<Operation>>,
}

impl InMemoryCluster {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            failures: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    /// Make the next `times` calls of `op` fail with a server error.
    pub fn fail_next(&self, op: Operation, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: Operation) -> Result<()> {
        self.calls.lock().unwrap().push(op);
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::from(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_owned(),
                    message: "injected failure".to_owned(),
                    reason: "InternalError".to_owned(),
                    code: 500,
                })))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BudgetClient for InMemoryCluster {
    async fn create_budget(&self, budget: &PodDisruptionBudget) -> Result<PodDisruptionBudget> {
        self.record(Operation::Create)?;
        Ok(self.state.write().await.create_budget(budget.clone()))
    }

    async fn delete_budget(&self, budget: &PodDisruptionBudget) -> Result<()> {
        self.record(Operation::Delete)?;
        let removed = self
            .state
            .write()
            .await
            .delete_budget(&budget.metadata.namespace, &budget.metadata.name);
        if removed {
            Ok(())
        } else {
            Err(Error::NotFound {
                kind: "PodDisruptionBudget",
                key: budget.key().to_string(),
            })
        }
    }

    async fn update_instance(&self, instance: &VirtualMachineInstance) -> Result<()> {
        self.record(Operation::UpdateInstance)?;
        if self
            .state
            .write()
            .await
            .update_instance_conditions(instance)
        {
            Ok(())
        } else {
            Err(Error::NotFound {
                kind: "VirtualMachineInstance",
                key: instance.key().to_string(),
            })
        }
    }
}

pub type TestDispatcher = Dispatcher<Arc<InMemoryCluster>, Arc<RecordingEventPublisher>>;

pub struct Harness {
    pub state: SharedState,
    pub queue: WorkQueue,
    pub cluster: Arc<InMemoryCluster>,
    pub events: Arc<RecordingEventPublisher>,
    pub dispatcher: TestDispatcher,
}

impl Harness {
    pub fn new(view: StateView) -> Self {
        let state = Arc::new(RwLock::new(view));
        let queue = WorkQueue::default();
        let cluster = Arc::new(InMemoryCluster::new(Arc::clone(&state)));
        let events = Arc::new(RecordingEventPublisher::default());
        let executor = Executor::new(Arc::clone(&cluster), Arc::clone(&events));
        let dispatcher = Dispatcher::new(Arc::clone(&state), queue.clone(), executor);
        Self {
            state,
            queue,
            cluster,
            events,
            dispatcher,
        }
    }

    pub async fn view(&self) -> StateView {
        self.state.read().await.clone()
    }

    /// Change an instance behind the controller's back.
    pub async fn modify_instance(&self, name: &str, f: impl FnOnce(&mut VirtualMachineInstance)) {
        let mut view = self.state.write().await;
        let mut vmi = view
            .instance(&key(name))
            .cloned()
            .expect("instance to modify");
        f(&mut vmi);
        view.instances.upsert(vmi);
    }

    pub async fn remove_instance(&self, name: &str) {
        self.state.write().await.instances.remove(&key(name));
    }

    pub async fn insert_budget(&self, budget: PodDisruptionBudget) {
        self.state.write().await.budgets.upsert(budget);
    }

    /// Reconcile the key once and assert it converged straight away.
    pub async fn converge(&self, name: &str) {
        self.dispatcher
            .reconcile(&key(name))
            .await
            .expect("reconcile to succeed");
        let view = self.view().await;
        let plan = DisruptionBudgetController
            .step(&key(name), &view)
            .expect("plan");
        assert!(plan.is_empty(), "not converged after one pass: {plan:?}");
    }
}
