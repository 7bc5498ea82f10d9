use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt::Display, str::FromStr};
use time::OffsetDateTime;

use crate::error::Error;

/// Label on a budget's selector that binds it to the UID of the instance it protects.
pub const CREATED_BY_LABEL: &str = "kubevirt.io/created-by";

/// Condition type marking that the budget was widened for the current migration.
pub const MIGRATION_IS_PROTECTED: &str = "MigrationIsProtected";

/// Prefix the server extends into the name of every budget we create.
pub const BUDGET_GENERATE_NAME: &str = "kubevirt-disruption-budget-";

pub const VIRTUAL_MACHINE_INSTANCE_KIND: GroupVersionKind = GroupVersionKind {
    group: "kubevirt.io",
    version: "v1",
    kind: "VirtualMachineInstance",
};

pub const POD_DISRUPTION_BUDGET_KIND: GroupVersionKind = GroupVersionKind {
    group: "policy",
    version: "v1",
    kind: "PodDisruptionBudget",
};

pub trait Meta {
    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata().namespace, &self.metadata().name)
    }
}

macro_rules! impl_meta {
    ($r:ident) => {
        impl Meta for $r {
            fn metadata(&self) -> &Metadata {
                &self.metadata
            }
            fn metadata_mut(&mut self) -> &mut Metadata {
                &mut self.metadata
            }
        }
    };
}

impl_meta!(VirtualMachineInstance);
impl_meta!(PodDisruptionBudget);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl GroupVersionKind {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// The `namespace/name` pair identifying an instance in the work queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(Error::InvalidKey(s.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Time(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl Time {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    // Used by the server to generate a unique name when `name` is empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Time>,

    // Set by the server once a graceful deletion was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Time>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub labels: BTreeMap<String, String>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub block_owner_deletion: bool,
    #[serde(default)]
    pub controller: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualMachineInstance {
    pub metadata: Metadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: VirtualMachineInstanceSpec,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: VirtualMachineInstanceStatus,
}

impl VirtualMachineInstance {
    /// Whether voluntary evictions should be turned into live migrations.
    pub fn is_live_migratable(&self) -> bool {
        self.spec.eviction_strategy == Some(EvictionStrategy::LiveMigrate)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn is_migration_protected(&self) -> bool {
        self.status
            .conditions
            .get(MIGRATION_IS_PROTECTED)
            .map_or(false, |c| c.status == ConditionStatus::True)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<EvictionStrategy>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvictionStrategy {
    None,
    LiveMigrate,
    LiveMigrateIfPossible,
    External,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Conditions::is_empty"
    )]
    pub conditions: Conditions,
}

/// Progress of the most recent migration. The flags are not mutually exclusive on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub failed: bool,
}

impl MigrationState {
    pub fn is_resolved(&self) -> bool {
        self.completed || self.failed
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceCondition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VirtualMachineInstanceCondition {
    pub fn new(r#type: &str, status: ConditionStatus) -> Self {
        Self {
            r#type: r#type.to_owned(),
            status,
            last_probe_time: None,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Conditions keyed by their type.
///
/// On the wire this is a list; a type appearing more than once collapses onto
/// the most recently appended entry, keeping the position of the first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Conditions(Vec<VirtualMachineInstanceCondition>);

impl Conditions {
    pub fn get(&self, cond_type: &str) -> Option<&VirtualMachineInstanceCondition> {
        self.0.iter().find(|c| c.r#type == cond_type)
    }

    /// Insert the condition, replacing any existing one of the same type.
    pub fn set(&mut self, condition: VirtualMachineInstanceCondition) {
        match self.0.iter_mut().find(|c| c.r#type == condition.r#type) {
            Some(existing) => *existing = condition,
            None => self.0.push(condition),
        }
    }

    pub fn remove(&mut self, cond_type: &str) -> Option<VirtualMachineInstanceCondition> {
        let pos = self.0.iter().position(|c| c.r#type == cond_type)?;
        Some(self.0.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualMachineInstanceCondition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<VirtualMachineInstanceCondition> for Conditions {
    fn from_iter<I: IntoIterator<Item = VirtualMachineInstanceCondition>>(iter: I) -> Self {
        let mut conditions = Conditions::default();
        for condition in iter {
            conditions.set(condition);
        }
        conditions
    }
}

impl Serialize for Conditions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.0)
    }
}

impl<'de> Deserialize<'de> for Conditions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let conditions = Vec::<VirtualMachineInstanceCondition>::deserialize(deserializer)?;
        Ok(conditions.into_iter().collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodDisruptionBudget {
    pub metadata: Metadata,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: PodDisruptionBudgetSpec,
}

impl PodDisruptionBudget {
    /// The integer `minAvailable`, if one is set. Percentages count as unset.
    pub fn min_available(&self) -> Option<i32> {
        match self.spec.min_available {
            Some(IntOrString::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// The UID of the instance this budget is bound to by its selector label.
    pub fn selector_uid(&self) -> Option<&str> {
        self.spec
            .selector
            .as_ref()
            .and_then(|s| s.match_labels.get(CREATED_BY_LABEL))
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}
