use std::sync::Arc;

use async_trait::async_trait;
use derivative::Derivative;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use crate::controller::DisruptionBudgetAction;
use crate::error::{Error, Result};
use crate::events::{actions, budget_reference, reasons, EventPublisher};
use crate::resources::{Meta, ObjectKey, PodDisruptionBudget, VirtualMachineInstance};

/// The cluster operations a plan is carried out with.
#[async_trait]
pub trait BudgetClient: Send + Sync {
    /// Create the budget, returning it as stored by the server.
    async fn create_budget(&self, budget: &PodDisruptionBudget) -> Result<PodDisruptionBudget>;

    async fn delete_budget(&self, budget: &PodDisruptionBudget) -> Result<()>;

    /// Persist the conditions of the instance.
    async fn update_instance(&self, instance: &VirtualMachineInstance) -> Result<()>;
}

#[async_trait]
impl<T: BudgetClient + ?Sized> BudgetClient for Arc<T> {
    async fn create_budget(&self, budget: &PodDisruptionBudget) -> Result<PodDisruptionBudget> {
        (**self).create_budget(budget).await
    }

    async fn delete_budget(&self, budget: &PodDisruptionBudget) -> Result<()> {
        (**self).delete_budget(budget).await
    }

    async fn update_instance(&self, instance: &VirtualMachineInstance) -> Result<()> {
        (**self).update_instance(instance).await
    }
}

/// Applies plans against the cluster and reports budget changes as events.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Executor<C, P> {
    #[derivative(Debug = "ignore")]
    client: C,
    #[derivative(Debug = "ignore")]
    events: P,
}

impl<C: BudgetClient, P: EventPublisher> Executor<C, P> {
    pub fn new(client: C, events: P) -> Self {
        Self { client, events }
    }

    /// Carry out every action of the plan in order.
    ///
    /// A failing action does not stop the ones after it. Actions on objects that are already gone
    /// count as done.
    pub async fn execute(&self, key: &ObjectKey, plan: Vec<DisruptionBudgetAction>) -> Result<()> {
        let attempted = plan.len();
        let mut failed = 0;
        let mut first = None;
        for action in plan {
            if let Err(error) = self.apply(&action).await {
                warn!(%key, %error, ?action, "Action failed");
                failed += 1;
                first.get_or_insert(error);
            }
        }
        match first {
            None => Ok(()),
            Some(first) => Err(Error::Plan {
                failed,
                attempted,
                first: Box::new(first),
            }),
        }
    }

    async fn apply(&self, action: &DisruptionBudgetAction) -> Result<()> {
        match action {
            DisruptionBudgetAction::DeleteBudget(budget) => {
                match self.client.delete_budget(budget).await {
                    Ok(()) => {
                        info!(budget = %budget.key(), "Deleted PodDisruptionBudget");
                        self.events
                            .publish(
                                &budget_reference(budget),
                                EventType::Normal,
                                reasons::SUCCESSFUL_DELETE,
                                actions::DELETE,
                                Some(format!(
                                    "Deleted PodDisruptionBudget {}",
                                    budget.metadata.name
                                )),
                            )
                            .await;
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(budget = %budget.key(), "Budget already gone");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            DisruptionBudgetAction::CreateBudget(budget) => {
                let created = self.client.create_budget(budget).await?;
                info!(
                    budget = %created.key(),
                    min_available = ?created.min_available(),
                    "Created PodDisruptionBudget"
                );
                self.events
                    .publish(
                        &budget_reference(&created),
                        EventType::Normal,
                        reasons::SUCCESSFUL_CREATE,
                        actions::CREATE,
                        Some(format!(
                            "Created PodDisruptionBudget {}",
                            created.metadata.name
                        )),
                    )
                    .await;
                Ok(())
            }
            DisruptionBudgetAction::UpdateInstance(instance) => {
                match self.client.update_instance(instance).await {
                    Ok(()) => {
                        info!(
                            instance = %instance.key(),
                            protected = instance.is_migration_protected(),
                            "Updated migration protection"
                        );
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(instance = %instance.key(), "Instance already gone");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}
