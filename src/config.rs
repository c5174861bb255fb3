//! Process-wide operator configuration
//!
//! [`ManagedRegistries`] is built once at startup and shared read-only by every
//! handler, so each reconciliation runs against the same immutable snapshot.

use crate::error::{OperatorError, Result};
use std::collections::BTreeSet;

/// Label Strimzi puts on every Secret it generates for a Kafka cluster
pub const STRIMZI_CLUSTER_LABEL: &str = "strimzi.io/cluster";

/// The Strimzi cluster and the set of registries this operator manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRegistries {
    cluster_name: String,
    registry_names: BTreeSet<String>,
}

impl ManagedRegistries {
    /// Create the managed set.
    ///
    /// Registry names are trimmed; blank entries are dropped.
    pub fn new<I, S>(cluster_name: impl Into<String>, registry_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cluster_name = cluster_name.into().trim().to_string();
        if cluster_name.is_empty() {
            return Err(OperatorError::Configuration(
                "cluster name must not be empty".to_string(),
            ));
        }

        let registry_names = registry_names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        Ok(Self {
            cluster_name,
            registry_names,
        })
    }

    /// Name of the Strimzi Kafka cluster
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Managed registry names, in sorted order
    pub fn registry_names(&self) -> impl Iterator<Item = &str> {
        self.registry_names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.registry_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry_names.is_empty()
    }

    /// Whether `name` is a managed registry
    pub fn contains(&self, name: &str) -> bool {
        self.registry_names.contains(name)
    }

    /// Name of the Secret holding the cluster CA certificate
    pub fn cluster_ca_secret_name(&self) -> String {
        cluster_ca_secret_name(&self.cluster_name)
    }

    /// Label selector matching Secrets that belong to the managed cluster
    pub fn secret_label_selector(&self) -> String {
        format!("{}={}", STRIMZI_CLUSTER_LABEL, self.cluster_name)
    }
}

/// Name of the Secret Strimzi stores a cluster's CA certificate in
pub fn cluster_ca_secret_name(cluster: &str) -> String {
    format!("{}-cluster-ca-cert", cluster)
}
