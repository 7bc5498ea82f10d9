use crate::controller::DisruptionBudgetAction;
use crate::resources::{Meta, ObjectKey, PodDisruptionBudget, VirtualMachineInstance};

pub mod resources;

pub use resources::Resources;

/// A snapshot of the locally cached cluster objects the controller reads from.
#[derive(Default, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateView {
    /// Bumped on every change applied through this view.
    pub revision: u64,
    pub instances: Resources<VirtualMachineInstance>,
    pub budgets: Resources<PodDisruptionBudget>,
}

impl StateView {
    pub fn with_instance(mut self, instance: VirtualMachineInstance) -> Self {
        self.instances.upsert(instance);
        self
    }

    pub fn with_budget(mut self, budget: PodDisruptionBudget) -> Self {
        self.budgets.upsert(budget);
        self
    }

    pub fn instance(&self, key: &ObjectKey) -> Option<&VirtualMachineInstance> {
        self.instances.get(key)
    }

    pub fn budgets_in_namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a PodDisruptionBudget> + 'a {
        self.budgets.in_namespace(namespace)
    }

    /// Create a budget the way the API server would: the name is generated from the prefix and
    /// a UID is assigned.
    pub fn create_budget(&mut self, mut budget: PodDisruptionBudget) -> PodDisruptionBudget {
        self.revision += 1;
        if budget.metadata.name.is_empty() {
            budget.metadata.name = format!("{}{}", budget.metadata.generate_name, self.revision);
        }
        if budget.metadata.uid.is_empty() {
            budget.metadata.uid = format!("budget-{}", self.revision);
        }
        budget.metadata.resource_version = self.revision.to_string();
        self.budgets.upsert(budget.clone());
        budget
    }

    /// Returns whether a budget was removed.
    pub fn delete_budget(&mut self, namespace: &str, name: &str) -> bool {
        let removed = self.budgets.remove(&ObjectKey::new(namespace, name));
        if removed.is_some() {
            self.revision += 1;
        }
        removed.is_some()
    }

    /// Replace the conditions of a cached instance. Returns false if the instance is gone or was
    /// recreated under a different UID.
    pub fn update_instance_conditions(&mut self, instance: &VirtualMachineInstance) -> bool {
        let key = instance.key();
        let Some(existing) = self.instances.get(&key) else {
            return false;
        };
        if existing.metadata.uid != instance.metadata.uid {
            return false;
        }
        let mut updated = existing.clone();
        updated.status.conditions = instance.status.conditions.clone();
        self.revision += 1;
        updated.metadata.resource_version = self.revision.to_string();
        self.instances.upsert(updated);
        true
    }

    /// Apply a controller action directly to this view.
    pub fn apply(&mut self, action: &DisruptionBudgetAction) {
        match action {
            DisruptionBudgetAction::DeleteBudget(budget) => {
                self.delete_budget(&budget.metadata.namespace, &budget.metadata.name);
            }
            DisruptionBudgetAction::CreateBudget(budget) => {
                self.create_budget(budget.clone());
            }
            DisruptionBudgetAction::UpdateInstance(instance) => {
                self.update_instance_conditions(instance);
            }
        }
    }
}
