use crate::error::Result;
use crate::resources::ObjectKey;
use crate::state::StateView;

pub mod disruption_budget;
pub mod util;

pub use disruption_budget::{DisruptionBudgetAction, DisruptionBudgetController};

pub trait Controller {
    type Action;

    /// Work out the actions that converge the object at `key` towards its desired state, given a
    /// snapshot of the cluster. Must not block and must return nothing once converged.
    fn step(&self, key: &ObjectKey, global_state: &StateView) -> Result<Vec<Self::Action>>;

    fn name(&self) -> String;
}
