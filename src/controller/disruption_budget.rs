use std::collections::BTreeSet;

use maplit::btreemap;
use tracing::debug;

use crate::controller::util::{get_controller_of, new_controller_ref, with_migration_protection};
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::resources::{
    IntOrString, LabelSelector, Meta, Metadata, MigrationState, ObjectKey, PodDisruptionBudget,
    PodDisruptionBudgetSpec, VirtualMachineInstance, BUDGET_GENERATE_NAME, CREATED_BY_LABEL,
    VIRTUAL_MACHINE_INSTANCE_KIND,
};
use crate::state::StateView;

/// `minAvailable` outside of a migration.
pub const STEADY_MIN_AVAILABLE: i32 = 1;
/// `minAvailable` while a migration is in flight.
pub const MIGRATION_MIN_AVAILABLE: i32 = 2;

#[derive(Clone, Debug, Default)]
pub struct DisruptionBudgetController;

/// A single mutation of the cluster. Plans are ordered deletions first, then the creation, then
/// the instance update.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DisruptionBudgetAction {
    DeleteBudget(PodDisruptionBudget),
    CreateBudget(PodDisruptionBudget),
    /// Persist the instance's migration protection condition.
    UpdateInstance(VirtualMachineInstance),
}

impl Controller for DisruptionBudgetController {
    type Action = DisruptionBudgetAction;

    fn step(&self, key: &ObjectKey, global_state: &StateView) -> Result<Vec<Self::Action>> {
        let observed = Observed::from_view(key, global_state);
        decide(key, &observed)
    }

    fn name(&self) -> String {
        "DisruptionBudget".to_owned()
    }
}

/// Everything the decision for one key looks at.
#[derive(Clone, Debug, Default)]
pub struct Observed<'a> {
    /// The instance cached under the key, if any.
    pub instance: Option<&'a VirtualMachineInstance>,
    /// Every budget in the key's namespace.
    pub budgets: Vec<&'a PodDisruptionBudget>,
    /// UIDs of the instances currently cached in the key's namespace.
    pub live_uids: BTreeSet<&'a str>,
}

impl<'a> Observed<'a> {
    pub fn from_view(key: &'a ObjectKey, view: &'a StateView) -> Self {
        let instance = view.instance(key);
        let budgets = view.budgets_in_namespace(&key.namespace).collect();
        let live_uids = view
            .instances
            .in_namespace(&key.namespace)
            .map(|i| i.metadata.uid.as_str())
            .collect();
        Self {
            instance,
            budgets,
            live_uids,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
    OwnedByThisInstance,
    OrphanedOrForeign,
}

/// Whether `budget` is bound to `instance` by both its selector label and an owner reference.
pub fn resolve_owner(
    budget: &PodDisruptionBudget,
    instance: &VirtualMachineInstance,
) -> Result<Ownership> {
    if budget.metadata.namespace != instance.metadata.namespace {
        return Err(Error::Invariant(format!(
            "budget {} resolved against instance {} in another namespace",
            budget.key(),
            instance.key()
        )));
    }
    let bound = budget.selector_uid() == Some(instance.metadata.uid.as_str());
    if bound && !budget.metadata.owner_references.is_empty() {
        Ok(Ownership::OwnedByThisInstance)
    } else {
        Ok(Ownership::OrphanedOrForeign)
    }
}

/// Desired budget shape for an instance's current migration status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MigrationWindow {
    pub min_available: i32,
    /// Whether the protection condition should be present.
    pub protected: bool,
}

impl MigrationWindow {
    pub const STEADY: MigrationWindow = MigrationWindow {
        min_available: STEADY_MIN_AVAILABLE,
        protected: false,
    };

    pub const PROTECTED: MigrationWindow = MigrationWindow {
        min_available: MIGRATION_MIN_AVAILABLE,
        protected: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MigrationPhase {
    Idle,
    Pending,
    Resolved,
}

impl MigrationPhase {
    fn of(state: Option<&MigrationState>) -> Self {
        match state {
            Some(s) if s.is_resolved() => MigrationPhase::Resolved,
            Some(s) if s.pending => MigrationPhase::Pending,
            Some(_) | None => MigrationPhase::Idle,
        }
    }
}

pub fn classify(instance: &VirtualMachineInstance) -> MigrationWindow {
    let phase = MigrationPhase::of(instance.status.migration_state.as_ref());
    match (phase, instance.is_migration_protected()) {
        // an outcome beats a pending flag still set alongside it, otherwise the window flaps
        (MigrationPhase::Resolved, _) => MigrationWindow::STEADY,
        // entering the window, or already inside it
        (MigrationPhase::Pending, _) => MigrationWindow::PROTECTED,
        // widened but not resolved yet
        (MigrationPhase::Idle, true) => MigrationWindow::PROTECTED,
        (MigrationPhase::Idle, false) => MigrationWindow::STEADY,
    }
}

/// Whether the decision for `key` is responsible for `budget`.
///
/// That is the case when the budget's controller reference names the key, when its selector label
/// carries the UID of the instance cached under the key, or when no controller reference names an
/// instance and its label points at no live instance in the namespace.
fn is_attributable(key: &ObjectKey, observed: &Observed, budget: &PodDisruptionBudget) -> bool {
    let same_namespace = budget.metadata.namespace == key.namespace;
    let controller = get_controller_of(&budget.metadata)
        .filter(|or| or.kind == VIRTUAL_MACHINE_INSTANCE_KIND.kind);
    let by_owner = same_namespace && controller.map_or(false, |or| or.name == key.name);
    let by_label = observed
        .instance
        .map_or(false, |i| budget.selector_uid() == Some(i.metadata.uid.as_str()));
    // must agree with `keys_for_budget`, which routes these under the budget's own key
    let dangling = same_namespace
        && controller.is_none()
        && budget
            .selector_uid()
            .map_or(false, |uid| !observed.live_uids.contains(uid));
    by_owner || by_label || dangling
}

/// Compute the ordered plan converging the budget of the instance at `key`.
pub fn decide(key: &ObjectKey, observed: &Observed) -> Result<Vec<DisruptionBudgetAction>> {
    let mut plan = Vec::new();
    let attributable: Vec<&PodDisruptionBudget> = observed
        .budgets
        .iter()
        .copied()
        .filter(|b| is_attributable(key, observed, b))
        .collect();

    let instance = match observed.instance {
        Some(i) if !i.is_deleting() && i.is_live_migratable() => i,
        instance => {
            if !attributable.is_empty() {
                debug!(
                    %key,
                    present = instance.is_some(),
                    budgets = attributable.len(),
                    "Instance needs no budget, deleting"
                );
            }
            plan.extend(
                attributable
                    .into_iter()
                    .map(|b| DisruptionBudgetAction::DeleteBudget(b.clone())),
            );
            return Ok(plan);
        }
    };

    let window = classify(instance);

    let mut owned = Vec::new();
    for budget in attributable {
        match resolve_owner(budget, instance)? {
            Ownership::OwnedByThisInstance => owned.push(budget),
            Ownership::OrphanedOrForeign => {
                debug!(%key, budget = %budget.metadata.name, "Deleting orphaned or foreign budget");
                plan.push(DisruptionBudgetAction::DeleteBudget(budget.clone()));
            }
        }
    }

    // keep a single owned budget, preferring one that already has the right value
    let keep = owned
        .iter()
        .position(|b| b.min_available() == Some(window.min_available))
        .unwrap_or(0);
    let mut kept = None;
    for (i, budget) in owned.into_iter().enumerate() {
        if i == keep {
            kept = Some(budget);
        } else {
            debug!(%key, budget = %budget.metadata.name, "Deleting duplicate budget");
            plan.push(DisruptionBudgetAction::DeleteBudget(budget.clone()));
        }
    }

    match kept {
        Some(budget) if budget.min_available() == Some(window.min_available) => {}
        Some(budget) => {
            debug!(
                %key,
                budget = %budget.metadata.name,
                from = ?budget.min_available(),
                to = window.min_available,
                "Replacing budget"
            );
            plan.push(DisruptionBudgetAction::DeleteBudget(budget.clone()));
            plan.push(DisruptionBudgetAction::CreateBudget(new_budget(
                instance,
                window.min_available,
            )));
        }
        None => {
            debug!(%key, min_available = window.min_available, "Creating budget");
            plan.push(DisruptionBudgetAction::CreateBudget(new_budget(
                instance,
                window.min_available,
            )));
        }
    }

    if instance.is_migration_protected() != window.protected {
        debug!(%key, protected = window.protected, "Updating migration protection");
        plan.push(DisruptionBudgetAction::UpdateInstance(
            with_migration_protection(instance, window.protected),
        ));
    }

    Ok(plan)
}

/// The budget protecting `instance`, before the server assigns its name.
pub fn new_budget(instance: &VirtualMachineInstance, min_available: i32) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: Metadata {
            generate_name: BUDGET_GENERATE_NAME.to_owned(),
            namespace: instance.metadata.namespace.clone(),
            owner_references: vec![new_controller_ref(
                &instance.metadata,
                &VIRTUAL_MACHINE_INSTANCE_KIND,
            )],
            ..Default::default()
        },
        spec: PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available)),
            selector: Some(LabelSelector {
                match_labels: btreemap! {
                    CREATED_BY_LABEL.to_owned() => instance.metadata.uid.clone(),
                },
            }),
        },
    }
}

/// Keys that need reconciling when `budget` changes.
///
/// A budget that cannot be traced back to any instance is routed under its own key so that the
/// pass for that key sweeps it up.
pub fn keys_for_budget(view: &StateView, budget: &PodDisruptionBudget) -> Vec<ObjectKey> {
    let namespace = &budget.metadata.namespace;
    let mut keys = Vec::new();
    if let Some(owner) = get_controller_of(&budget.metadata) {
        if owner.kind == VIRTUAL_MACHINE_INSTANCE_KIND.kind {
            keys.push(ObjectKey::new(namespace, &owner.name));
        }
    }
    if let Some(uid) = budget.selector_uid() {
        if let Some(instance) = view.instances.with_uid(namespace, uid) {
            keys.push(instance.key());
        }
        if keys.is_empty() {
            keys.push(budget.key());
        }
    }
    keys.sort();
    keys.dedup();
    keys
}
