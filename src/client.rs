use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams, Preconditions};
use kube::{Api, Client};
use serde_json::json;

use crate::api::{convert, APIObject, RemotePodDisruptionBudget};
use crate::error::{Error, Result};
use crate::executor::BudgetClient;
use crate::resources::{Meta, PodDisruptionBudget, VirtualMachineInstance};

const BUDGET: &str = "PodDisruptionBudget";
const INSTANCE: &str = "VirtualMachineInstance";

/// [`BudgetClient`] talking to the API server.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn budgets(&self, namespace: &str) -> Api<RemotePodDisruptionBudget> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn instances(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &VirtualMachineInstance::api_resource(),
        )
    }
}

fn not_found(kind: &'static str, key: String, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(response) if response.code == 404 => Error::NotFound { kind, key },
        error => error.into(),
    }
}

#[async_trait]
impl BudgetClient for KubeClient {
    async fn create_budget(&self, budget: &PodDisruptionBudget) -> Result<PodDisruptionBudget> {
        let remote: RemotePodDisruptionBudget = convert(budget, BUDGET)?;
        let created = self
            .budgets(&budget.metadata.namespace)
            .create(&PostParams::default(), &remote)
            .await?;
        convert(&created, BUDGET)
    }

    async fn delete_budget(&self, budget: &PodDisruptionBudget) -> Result<()> {
        // never delete a same-named replacement
        let preconditions = (!budget.metadata.uid.is_empty()).then(|| Preconditions {
            uid: Some(budget.metadata.uid.clone()),
            resource_version: None,
        });
        let params = DeleteParams {
            preconditions,
            ..Default::default()
        };
        self.budgets(&budget.metadata.namespace)
            .delete(&budget.metadata.name, &params)
            .await
            .map_err(|e| not_found(BUDGET, budget.key().to_string(), e))?;
        Ok(())
    }

    async fn update_instance(&self, instance: &VirtualMachineInstance) -> Result<()> {
        let mut patch = json!({
            "status": { "conditions": &instance.status.conditions },
        });
        if !instance.metadata.resource_version.is_empty() {
            patch["metadata"] = json!({ "resourceVersion": &instance.metadata.resource_version });
        }
        self.instances(&instance.metadata.namespace)
            .patch(
                &instance.metadata.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| not_found(INSTANCE, instance.key().to_string(), e))?;
        Ok(())
    }
}
