//! Secret change events and their classification
//!
//! Strimzi labels every Secret it generates with `strimzi.io/cluster`. Of
//! those, two kinds matter here: the cluster CA certificate Secret, whose
//! rotation affects every managed registry, and the KafkaUser Secret of a
//! managed registry, which shares the registry's name.

use crate::config::{ManagedRegistries, STRIMZI_CLUSTER_LABEL};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Kind of change observed on a Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretEventType {
    Added,
    Modified,
    Deleted,
}

/// One observed change of a Secret
#[derive(Debug, Clone)]
pub struct SecretEvent {
    pub event_type: SecretEventType,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub body: Secret,
}

impl SecretEvent {
    pub fn new(event_type: SecretEventType, body: Secret) -> Self {
        Self {
            event_type,
            name: body.name_any(),
            namespace: body.namespace().unwrap_or_else(|| "default".to_string()),
            labels: body.labels().clone(),
            body,
        }
    }

    /// Event for the current state of an observed Secret
    pub fn observed(body: Secret) -> Self {
        let event_type = if body.metadata.deletion_timestamp.is_some() {
            SecretEventType::Deleted
        } else {
            SecretEventType::Modified
        };
        Self::new(event_type, body)
    }

    pub fn cluster_label(&self) -> Option<&str> {
        self.labels.get(STRIMZI_CLUSTER_LABEL).map(String::as_str)
    }
}

/// Where a Secret event should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The cluster CA certificate changed
    ClusterCa,
    /// The client certificate of one managed registry changed
    ClientSecret { registry: String },
    Ignore,
}

/// Classify a Secret event against the managed set. Pure: no side effects.
pub fn classify(managed: &ManagedRegistries, event: &SecretEvent) -> Dispatch {
    if !matches!(
        event.event_type,
        SecretEventType::Added | SecretEventType::Modified
    ) {
        return Dispatch::Ignore;
    }

    if event.cluster_label() != Some(managed.cluster_name()) {
        return Dispatch::Ignore;
    }

    if event.name == managed.cluster_ca_secret_name() {
        Dispatch::ClusterCa
    } else if managed.contains(&event.name) {
        Dispatch::ClientSecret {
            registry: event.name.clone(),
        }
    } else {
        Dispatch::Ignore
    }
}
