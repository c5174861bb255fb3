//! Secret Controller
//!
//! Watches Strimzi-generated Secrets and refreshes the keystores of managed
//! StrimziSchemaRegistry deployments when the cluster CA or a registry's
//! client certificate rotates.

use crate::certificates::{secret_version, CertificateGenerator, CertificateRequest, CertificateSource};
use crate::config::{ManagedRegistries, STRIMZI_CLUSTER_LABEL};
use crate::controllers::{error_policy_backoff, Controller, WatchScope};
use crate::deployments::refresh_deployment;
use crate::error::{OperatorError, Result};
use crate::events::{classify, Dispatch, SecretEvent};
use crate::store::ClusterStore;
use crate::strimzi::resolve_api_version;
use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of fanning a cluster CA rotation out to every managed registry
#[derive(Debug, Default)]
pub struct FanOutReport {
    /// Registries whose deployment was refreshed
    pub refreshed: Vec<String>,
    /// Registries that could not be refreshed
    pub failed: Vec<(String, OperatorError)>,
}

impl FanOutReport {
    /// Smallest suggested delay among retryable failures, if any
    pub fn retry_delay(&self) -> Option<std::time::Duration> {
        self.failed
            .iter()
            .filter_map(|(_, e)| e.requeue_delay())
            .min()
    }
}

/// What handling one Secret event did
#[derive(Debug)]
pub enum SecretOutcome {
    Ignored,
    ClusterCaRotated(FanOutReport),
    ClientSecretRotated { registry: String },
}

/// Handles Secret change events for the managed registries
pub struct SecretWatcher {
    registries: Arc<ManagedRegistries>,
    store: Arc<dyn ClusterStore>,
    generator: Arc<dyn CertificateGenerator>,
}

impl SecretWatcher {
    pub fn new(
        registries: Arc<ManagedRegistries>,
        store: Arc<dyn ClusterStore>,
        generator: Arc<dyn CertificateGenerator>,
    ) -> Self {
        Self {
            registries,
            store,
            generator,
        }
    }

    async fn reconcile(&self, secret: Arc<Secret>) -> Result<Action> {
        let event = SecretEvent::observed(secret.as_ref().clone());
        match self.on_secret_event(event).await? {
            SecretOutcome::ClusterCaRotated(report) => match report.retry_delay() {
                Some(delay) => Ok(Action::requeue(delay)),
                None => Ok(Action::await_change()),
            },
            _ => Ok(Action::await_change()),
        }
    }

    /// Classify an event and dispatch it to the matching reconciler
    pub async fn on_secret_event(&self, event: SecretEvent) -> Result<SecretOutcome> {
        match classify(&self.registries, &event) {
            Dispatch::Ignore => Ok(SecretOutcome::Ignored),
            Dispatch::ClusterCa => {
                info!(
                    "Cluster CA Secret {}/{} changed",
                    event.namespace, event.name
                );
                let report = self
                    .refresh_with_new_cluster_ca(&event.body, &event.namespace)
                    .await;
                Ok(SecretOutcome::ClusterCaRotated(report))
            }
            Dispatch::ClientSecret { registry } => {
                info!(
                    "Client certificate Secret {}/{} changed",
                    event.namespace, event.name
                );
                self.refresh_with_new_client_secret(&event.body, &event.namespace)
                    .await?;
                Ok(SecretOutcome::ClientSecretRotated { registry })
            }
        }
    }

    /// Refresh every managed registry after a cluster CA rotation.
    ///
    /// Registries are processed concurrently; one failing does not stop the
    /// others.
    pub async fn refresh_with_new_cluster_ca(
        &self,
        ca_secret: &Secret,
        namespace: &str,
    ) -> FanOutReport {
        let cluster = secret_cluster(ca_secret)
            .unwrap_or_else(|| self.registries.cluster_name())
            .to_string();

        let refreshes = self.registries.registry_names().map(|registry_name| {
            let source = CertificateSource::ClusterCa(ca_secret.clone());
            let cluster = cluster.as_str();
            async move {
                let result = self
                    .refresh_registry(registry_name, namespace, cluster, source)
                    .await;
                (registry_name.to_string(), result)
            }
        });

        let mut report = FanOutReport::default();
        for (registry_name, result) in join_all(refreshes).await {
            match result {
                Ok(()) => report.refreshed.push(registry_name),
                Err(e) => {
                    error!(
                        "Failed to refresh StrimziSchemaRegistry {}/{} after cluster CA rotation: {}",
                        namespace, registry_name, e
                    );
                    report.failed.push((registry_name, e));
                }
            }
        }

        info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "Cluster CA rotation processed"
        );
        report
    }

    /// Refresh the single registry whose KafkaUser Secret rotated
    pub async fn refresh_with_new_client_secret(
        &self,
        client_secret: &Secret,
        namespace: &str,
    ) -> Result<()> {
        let registry_name = client_secret.name_any();
        let cluster = secret_cluster(client_secret)
            .unwrap_or_else(|| self.registries.cluster_name())
            .to_string();

        self.refresh_registry(
            &registry_name,
            namespace,
            &cluster,
            CertificateSource::ClientSecret(client_secret.clone()),
        )
        .await
    }

    /// Regenerate one registry's keystore bundle and roll its deployment
    async fn refresh_registry(
        &self,
        registry_name: &str,
        namespace: &str,
        cluster: &str,
        source: CertificateSource,
    ) -> Result<()> {
        let registry = self.store.get_registry(registry_name, namespace).await?;
        let strimzi_api_version = resolve_api_version(registry_name, &registry.spec);

        // The KafkaUser shares the registry's name
        let kafka_user = self
            .store
            .get_kafka_user(registry_name, namespace, &strimzi_api_version)
            .await?;
        let credential_secret_name = kafka_user.secret_name()?.to_string();

        let secret = self
            .generator
            .generate_secret(CertificateRequest {
                credential_secret_name,
                namespace: namespace.to_string(),
                cluster: cluster.to_string(),
                owner: registry,
                source,
            })
            .await?;
        let version = secret_version(&secret)?;

        let mut deployment = self.store.get_deployment(registry_name, namespace).await?;
        refresh_deployment(
            self.store.as_ref(),
            &mut deployment,
            &version,
            registry_name,
            namespace,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Controller for SecretWatcher {
    /// Run the Secret controller over Strimzi-labelled Secrets in `scope`
    async fn run(self: Arc<Self>, scope: WatchScope) -> Result<()> {
        let secrets: Api<Secret> = scope.api();
        let selector = self.registries.secret_label_selector();

        info!(
            cluster = self.registries.cluster_name(),
            registries = self.registries.len(),
            "Starting Secret controller"
        );

        KubeController::new(secrets, Config::default().labels(&selector))
            .shutdown_on_signal()
            .run(
                |secret, ctx| async move { ctx.reconcile(secret).await },
                |secret, error, ctx| {
                    error!("Secret reconciliation error: {}", error);
                    error_policy_backoff(secret, error, ctx)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled secret: {}", obj.name);
                    }
                    Err(e) => {
                        warn!("Secret reconciliation failed: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "secret"
    }
}

fn secret_cluster(secret: &Secret) -> Option<&str> {
    secret.labels().get(STRIMZI_CLUSTER_LABEL).map(String::as_str)
}
