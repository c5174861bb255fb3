//! Controllers for the Strimzi Registry Operator
//!
//! The registry controller reconciles StrimziSchemaRegistry resources into a
//! Deployment and Service; the secret controller reacts to certificate
//! rotations published by Strimzi.

mod registry;
mod secret;

pub use registry::RegistryController;
pub use secret::{FanOutReport, SecretOutcome, SecretWatcher};

use crate::error::{OperatorError, Result};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Common trait for all controllers
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Start the controller's reconciliation loop
    async fn run(self: Arc<Self>, scope: WatchScope) -> Result<()>;

    /// Get the controller name for logging
    fn name(&self) -> &'static str;
}

/// Where a controller watches: one namespace, or the whole cluster
#[derive(Clone)]
pub struct WatchScope {
    client: Client,
    namespace: Option<String>,
}

impl WatchScope {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        Self { client, namespace }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// An [`Api`] for `K` restricted to this scope
    pub fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Map a reconciliation error onto the controller's next action: retryable
/// errors requeue after their delay, everything else waits for the next change.
pub(crate) fn error_policy_backoff<K, C>(
    _obj: Arc<K>,
    error: &OperatorError,
    _ctx: Arc<C>,
) -> Action {
    match error.requeue_delay() {
        Some(delay) => {
            debug!("Requeueing after {:?}: {}", delay, error);
            Action::requeue(delay)
        }
        None => Action::await_change(),
    }
}
