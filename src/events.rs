//! Kubernetes Events for budget changes.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails the reconciliation
//! that produced it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use crate::resources::{Meta, ObjectKey, PodDisruptionBudget, POD_DISRUPTION_BUDGET_KIND};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `object`.
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        (**self)
            .publish(object, type_, reason, action, note)
            .await
    }
}

/// Publishes through `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    /// `controller_name` shows up as the reporting component of every event.
    pub fn new(client: Client, controller_name: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller_name.to_owned(),
                instance: None,
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note,
            action: action.to_owned(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(
                reason,
                action,
                object = ?object.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event captured by [`RecordingEventPublisher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectKey,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = RecordedEvent {
            object: ObjectKey::new(
                object.namespace.as_deref().unwrap_or_default(),
                object.name.as_deref().unwrap_or_default(),
            ),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_owned(),
            action: action.to_owned(),
            note,
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Reference to a budget as the subject of an event.
pub fn budget_reference(budget: &PodDisruptionBudget) -> ObjectReference {
    let metadata = budget.metadata();
    ObjectReference {
        api_version: Some(POD_DISRUPTION_BUDGET_KIND.group_version()),
        kind: Some(POD_DISRUPTION_BUDGET_KIND.kind.to_owned()),
        name: Some(metadata.name.clone()),
        namespace: Some(metadata.namespace.clone()),
        uid: (!metadata.uid.is_empty()).then(|| metadata.uid.clone()),
        resource_version: (!metadata.resource_version.is_empty())
            .then(|| metadata.resource_version.clone()),
        ..Default::default()
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const SUCCESSFUL_DELETE: &str = "SuccessfulDelete";
}

pub mod actions {
    pub const CREATE: &str = "Create";
    pub const DELETE: &str = "Delete";
}
