use crate::resources::{
    ConditionStatus, GroupVersionKind, Metadata, OwnerReference, VirtualMachineInstance,
    VirtualMachineInstanceCondition, MIGRATION_IS_PROTECTED,
};

pub fn new_controller_ref(owner: &Metadata, gvk: &GroupVersionKind) -> OwnerReference {
    OwnerReference {
        api_version: gvk.group_version(),
        kind: gvk.kind.to_owned(),
        name: owner.name.clone(),
        uid: owner.uid.clone(),
        block_owner_deletion: true,
        controller: true,
    }
}

/// The owner reference flagged as the managing controller, if any.
pub fn get_controller_of(metadata: &Metadata) -> Option<&OwnerReference> {
    metadata.owner_references.iter().find(|or| or.controller)
}

/// A copy of the instance with the migration protection marker set or cleared.
pub fn with_migration_protection(
    instance: &VirtualMachineInstance,
    protected: bool,
) -> VirtualMachineInstance {
    let mut instance = instance.clone();
    if protected {
        instance
            .status
            .conditions
            .set(VirtualMachineInstanceCondition::new(
                MIGRATION_IS_PROTECTED,
                ConditionStatus::True,
            ));
    } else {
        instance.status.conditions.remove(MIGRATION_IS_PROTECTED);
    }
    instance
}
