use kube::core::{ApiResource, GroupVersionKind as KubeGroupVersionKind};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::resources::{GroupVersionKind, VIRTUAL_MACHINE_INSTANCE_KIND};

/// Remote budget type served by the API server.
pub type RemotePodDisruptionBudget = k8s_openapi::api::policy::v1::PodDisruptionBudget;

pub trait APIObject {
    fn gvk() -> GroupVersionKind;
    fn plural() -> &'static str;

    fn api_resource() -> ApiResource {
        let gvk = Self::gvk();
        ApiResource::from_gvk_with_plural(
            &KubeGroupVersionKind::gvk(gvk.group, gvk.version, gvk.kind),
            Self::plural(),
        )
    }
}

impl APIObject for crate::resources::VirtualMachineInstance {
    fn gvk() -> GroupVersionKind {
        VIRTUAL_MACHINE_INSTANCE_KIND
    }

    fn plural() -> &'static str {
        "virtualmachineinstances"
    }
}

/// Convert between the local resource model and a wire type through their JSON form.
///
/// Fields only one side knows about are dropped.
pub fn convert<F, T>(from: &F, kind: &'static str) -> Result<T>
where
    F: Serialize,
    T: DeserializeOwned,
{
    serde_json::to_value(from)
        .and_then(serde_json::from_value)
        .map_err(|source| Error::Serialization { kind, source })
}
