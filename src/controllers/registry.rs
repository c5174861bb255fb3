//! Registry Controller
//!
//! Reconciles StrimziSchemaRegistry custom resources into a Schema Registry
//! Deployment and Service wired to the Strimzi Kafka cluster over TLS.

use crate::bootstrap::resolve_bootstrap_server;
use crate::certificates::{
    secret_version, CertificateGenerator, CertificateRequest, CertificateSource,
};
use crate::conditions::{
    build_condition, set_condition, CONDITION_FALSE, CONDITION_TRUE,
    REGISTRY_CONDITION_CERTIFICATES_READY, REGISTRY_CONDITION_READY,
};
use crate::config::ManagedRegistries;
use crate::controllers::{error_policy_backoff, Controller, WatchScope};
use crate::crd::{RegistryPhase, RegistryStatus, StrimziSchemaRegistry};
use crate::deployments::{build_deployment, build_service};
use crate::error::Result;
use crate::store::ClusterStore;
use crate::strimzi::{resolve_api_version, resolve_listener_name};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::runtime::{predicates, reflector, watcher, WatchStreamExt};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue interval after a successful reconciliation
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// What a successful reconciliation resolved and applied
#[derive(Debug, Clone)]
struct Applied {
    strimzi_version: String,
    listener: String,
    bootstrap_server: String,
    secret_name: String,
    secret_version: String,
}

/// Context for the registry controller
pub struct RegistryController {
    registries: Arc<ManagedRegistries>,
    store: Arc<dyn ClusterStore>,
    generator: Arc<dyn CertificateGenerator>,
}

impl RegistryController {
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

    /// Reconcile a StrimziSchemaRegistry
    async fn reconcile(&self, registry: Arc<StrimziSchemaRegistry>) -> Result<Action> {
        let name = registry.name_any();
        let namespace = registry.namespace().unwrap_or_else(|| "default".to_string());

        if !self.registries.contains(&name) {
            warn!(
                "StrimziSchemaRegistry {}/{} is not in the managed set, skipping",
                namespace, name
            );
            return Ok(Action::await_change());
        }

        info!("Reconciling StrimziSchemaRegistry {}/{}", namespace, name);

        match self.apply(&registry, &name, &namespace).await {
            Ok(applied) => {
                let status = ready_status(&registry, &applied);
                if status_changed(registry.status.as_ref(), &status) {
                    self.store
                        .patch_registry_status(&name, &namespace, &status)
                        .await?;
                }
                info!(
                    "StrimziSchemaRegistry {}/{} ready with bootstrap server {}",
                    namespace, name, applied.bootstrap_server
                );
                Ok(Action::requeue(RESYNC_INTERVAL))
            }
            Err(e) => {
                let status = failed_status(&registry, &e.to_string());
                if !status_changed(registry.status.as_ref(), &status) {
                    return Err(e);
                }
                if let Err(status_err) = self
                    .store
                    .patch_registry_status(&name, &namespace, &status)
                    .await
                {
                    warn!(
                        "Failed to record error status on {}/{}: {}",
                        namespace, name, status_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        registry: &StrimziSchemaRegistry,
        name: &str,
        namespace: &str,
    ) -> Result<Applied> {
        let strimzi_version = resolve_api_version(name, &registry.spec);
        let listener = resolve_listener_name(name, &registry.spec);

        let kafka = self
            .store
            .get_kafka(self.registries.cluster_name(), namespace, &strimzi_version)
            .await?;
        let bootstrap_server = resolve_bootstrap_server(&kafka, &listener)?;

        let kafka_user = self
            .store
            .get_kafka_user(name, namespace, &strimzi_version)
            .await?;
        let credential_secret_name = kafka_user.secret_name()?.to_string();
        let client_secret = self
            .store
            .get_secret(&credential_secret_name, namespace)
            .await?;

        let bundle = self
            .generator
            .generate_secret(CertificateRequest {
                credential_secret_name,
                namespace: namespace.to_string(),
                cluster: self.registries.cluster_name().to_string(),
                owner: registry.clone(),
                source: CertificateSource::ClientSecret(client_secret),
            })
            .await?;
        let secret_name = bundle.name_any();
        let secret_version = secret_version(&bundle)?;

        let deployment = build_deployment(registry, &bootstrap_server, &secret_name, &secret_version);
        self.store.apply_deployment(&deployment).await?;
        self.store.apply_service(&build_service(registry)).await?;

        Ok(Applied {
            strimzi_version,
            listener,
            bootstrap_server,
            secret_name,
            secret_version,
        })
    }
}

#[async_trait]
impl Controller for RegistryController {
    /// Run the StrimziSchemaRegistry controller
    async fn run(self: Arc<Self>, scope: WatchScope) -> Result<()> {
        let registries: Api<StrimziSchemaRegistry> = scope.api();

        info!("Starting StrimziSchemaRegistry controller");

        // Status writes do not bump metadata.generation, so they never retrigger
        let (reader, writer) = reflector::store();
        let trigger = reflector(writer, watcher(registries, Config::default()))
            .default_backoff()
            .applied_objects()
            .predicate_filter(predicates::generation);

        KubeController::for_stream(trigger, reader)
            .shutdown_on_signal()
            .run(
                |registry, ctx| async move { ctx.reconcile(registry).await },
                |registry, error, ctx| {
                    error!("Reconciliation error: {:?}", error);
                    error_policy_backoff(registry, error, ctx)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        info!("Reconciled registry: {}", obj.name);
                    }
                    Err(e) => {
                        error!("Reconciliation failed: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "registry"
    }
}

fn ready_status(registry: &StrimziSchemaRegistry, applied: &Applied) -> RegistryStatus {
    let mut conditions = registry
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    set_condition(
        &mut conditions,
        build_condition(
            REGISTRY_CONDITION_CERTIFICATES_READY,
            CONDITION_TRUE,
            "KeystoresApplied",
            &format!(
                "Secret {} at version {}",
                applied.secret_name, applied.secret_version
            ),
        ),
    );
    set_condition(
        &mut conditions,
        build_condition(
            REGISTRY_CONDITION_READY,
            CONDITION_TRUE,
            "DeploymentApplied",
            "Registry deployment is up to date",
        ),
    );

    RegistryStatus {
        ready: true,
        phase: RegistryPhase::Ready,
        bootstrap_server: Some(applied.bootstrap_server.clone()),
        listener: Some(applied.listener.clone()),
        strimzi_version: Some(applied.strimzi_version.clone()),
        secret_version: Some(applied.secret_version.clone()),
        conditions,
        observed_generation: registry.metadata.generation,
        last_updated: Some(Utc::now().to_rfc3339()),
        error_message: None,
    }
}

/// Whether `new` differs from `current` in anything but its timestamps
fn status_changed(current: Option<&RegistryStatus>, new: &RegistryStatus) -> bool {
    fn normalized(status: &RegistryStatus) -> RegistryStatus {
        let mut status = status.clone();
        status.last_updated = None;
        for condition in &mut status.conditions {
            condition.last_transition_time = None;
        }
        status
    }

    match current {
        Some(current) => normalized(current) != normalized(new),
        None => true,
    }
}

/// Failed status; keeps what the last successful reconciliation resolved
fn failed_status(registry: &StrimziSchemaRegistry, message: &str) -> RegistryStatus {
    let mut status = registry.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        build_condition(
            REGISTRY_CONDITION_READY,
            CONDITION_FALSE,
            "ReconcileFailed",
            message,
        ),
    );
    status.ready = false;
    status.phase = RegistryPhase::Failed;
    status.observed_generation = registry.metadata.generation;
    status.last_updated = Some(Utc::now().to_rfc3339());
    status.error_message = Some(message.to_string());
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::MockCertificateGenerator;
    use crate::crd::kafka::{Kafka, KafkaUser};
    use crate::crd::RegistrySpec;
    use crate::deployments::deployed_secret_version;
    use crate::error::OperatorError;
    use crate::store::MockClusterStore;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::sync::Mutex;

    fn managed() -> Arc<ManagedRegistries> {
        Arc::new(ManagedRegistries::new("events", ["confluent-schema-registry"]).unwrap())
    }

    fn registry(name: &str) -> Arc<StrimziSchemaRegistry> {
        let mut r = StrimziSchemaRegistry::new(
            name,
            RegistrySpec {
                strimzi_version: Some("v1beta2".to_string()),
                listener: Some("tls".to_string()),
                ..Default::default()
            },
        );
        r.metadata.namespace = Some("events".to_string());
        r.metadata.generation = Some(3);
        Arc::new(r)
    }

    fn kafka() -> Kafka {
        Kafka::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "spec": { "kafka": { "listeners": [
                { "name": "tls", "type": "internal", "port": 9093, "tls": true }
            ] } },
            "status": { "listeners": [
                { "name": "tls", "type": "tls", "bootstrapServers": "events-kafka-bootstrap.events.svc:9093" }
            ] }
        }))
        .unwrap()
    }

    fn kafka_user() -> KafkaUser {
        serde_json::from_value(json!({
            "metadata": { "name": "confluent-schema-registry" },
            "status": { "secret": "confluent-schema-registry" }
        }))
        .unwrap()
    }

    fn bundle() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("confluent-schema-registry-keystores".to_string()),
                namespace: Some("events".to_string()),
                resource_version: Some("1234".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn generator() -> MockCertificateGenerator {
        let mut generator = MockCertificateGenerator::new();
        generator
            .expect_generate_secret()
            .withf(|req| {
                req.credential_secret_name == "confluent-schema-registry"
                    && req.cluster == "events"
                    && matches!(req.source, CertificateSource::ClientSecret(_))
            })
            .times(1)
            .returning(|_| Ok(bundle()));
        generator
    }

    #[tokio::test]
    async fn test_unmanaged_registry_skipped() {
        let controller = RegistryController::new(
            managed(),
            Arc::new(MockClusterStore::new()),
            Arc::new(MockCertificateGenerator::new()),
        );
        let action = controller.reconcile(registry("other-registry")).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_applies_deployment_and_status() {
        let deployments = Arc::new(Mutex::new(Vec::<Deployment>::new()));
        let statuses = Arc::new(Mutex::new(Vec::<RegistryStatus>::new()));

        let mut store = MockClusterStore::new();
        store
            .expect_get_kafka()
            .withf(|name, ns, version| name == "events" && ns == "events" && version == "v1beta2")
            .times(1)
            .returning(|_, _, _| Ok(kafka()));
        store
            .expect_get_kafka_user()
            .times(1)
            .returning(|_, _, _| Ok(kafka_user()));
        store
            .expect_get_secret()
            .withf(|name, _| name == "confluent-schema-registry")
            .times(1)
            .returning(|_, _| Ok(Secret::default()));
        let recorded = Arc::clone(&deployments);
        store
            .expect_apply_deployment()
            .times(1)
            .returning(move |d| {
                recorded.lock().unwrap().push(d.clone());
                Ok(d.clone())
            });
        store
            .expect_apply_service()
            .times(1)
            .returning(|s| Ok(s.clone()));
        let recorded = Arc::clone(&statuses);
        store
            .expect_patch_registry_status()
            .times(1)
            .returning(move |_, _, s| {
                recorded.lock().unwrap().push(s.clone());
                Ok(())
            });

        let controller = RegistryController::new(managed(), Arc::new(store), Arc::new(generator()));
        let action = controller
            .reconcile(registry("confluent-schema-registry"))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        let deployments = deployments.lock().unwrap();
        assert_eq!(deployed_secret_version(&deployments[0]), Some("1234"));

        let statuses = statuses.lock().unwrap();
        let status = &statuses[0];
        assert!(status.ready);
        assert_eq!(status.phase, RegistryPhase::Ready);
        assert_eq!(
            status.bootstrap_server.as_deref(),
            Some("events-kafka-bootstrap.events.svc:9093")
        );
        assert_eq!(status.secret_version.as_deref(), Some("1234"));
        assert_eq!(status.observed_generation, Some(3));
        assert_eq!(status.conditions.len(), 2);
    }

    fn applied() -> Applied {
        Applied {
            strimzi_version: "v1beta2".to_string(),
            listener: "tls".to_string(),
            bootstrap_server: "events-kafka-bootstrap.events.svc:9093".to_string(),
            secret_name: "confluent-schema-registry-keystores".to_string(),
            secret_version: "1234".to_string(),
        }
    }

    #[test]
    fn test_status_changed_ignores_timestamps() {
        let mut r = (*registry("confluent-schema-registry")).clone();
        let first = ready_status(&r, &applied());
        r.status = Some(first.clone());

        std::thread::sleep(Duration::from_millis(5));
        let second = ready_status(&r, &applied());
        assert_ne!(first.last_updated, second.last_updated);
        assert!(!status_changed(Some(&first), &second));

        let mut rotated = applied();
        rotated.secret_version = "1235".to_string();
        assert!(status_changed(Some(&first), &ready_status(&r, &rotated)));
        assert!(status_changed(None, &second));
    }

    #[tokio::test]
    async fn test_reconcile_skips_unchanged_status() {
        let mut r = (*registry("confluent-schema-registry")).clone();
        r.status = Some(ready_status(&r, &applied()));

        let mut store = MockClusterStore::new();
        store.expect_get_kafka().returning(|_, _, _| Ok(kafka()));
        store
            .expect_get_kafka_user()
            .returning(|_, _, _| Ok(kafka_user()));
        store
            .expect_get_secret()
            .returning(|_, _| Ok(Secret::default()));
        store
            .expect_apply_deployment()
            .returning(|d| Ok(d.clone()));
        store.expect_apply_service().returning(|s| Ok(s.clone()));
        store.expect_patch_registry_status().never();

        let controller = RegistryController::new(managed(), Arc::new(store), Arc::new(generator()));
        let action = controller.reconcile(Arc::new(r)).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
    }

    #[tokio::test]
    async fn test_repeated_failure_does_not_rewrite_status() {
        let mut r = (*registry("confluent-schema-registry")).clone();
        let message = "Resource not found: Kafka/events in namespace events";
        r.status = Some(failed_status(&r, message));

        let mut store = MockClusterStore::new();
        store.expect_get_kafka().times(1).returning(|name, ns, _| {
            Err(OperatorError::NotFound {
                kind: "Kafka".to_string(),
                name: name.to_string(),
                namespace: ns.to_string(),
            })
        });
        store.expect_patch_registry_status().never();

        let controller = RegistryController::new(
            managed(),
            Arc::new(store),
            Arc::new(MockCertificateGenerator::new()),
        );
        let err = controller.reconcile(Arc::new(r)).await.unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    #[tokio::test]
    async fn test_reconcile_failure_records_status_and_propagates() {
        let statuses = Arc::new(Mutex::new(Vec::<RegistryStatus>::new()));

        let mut store = MockClusterStore::new();
        store.expect_get_kafka().times(1).returning(|_, _, _| {
            Ok(Kafka::from_value(json!({
                "apiVersion": "kafka.strimzi.io/v1beta2",
                "kind": "Kafka",
                "spec": { "kafka": { "listeners": [
                    { "name": "tls", "type": "internal", "port": 9093, "tls": true }
                ] } }
            }))
            .unwrap())
        });
        let recorded = Arc::clone(&statuses);
        store
            .expect_patch_registry_status()
            .times(1)
            .returning(move |_, _, s| {
                recorded.lock().unwrap().push(s.clone());
                Ok(())
            });

        let controller = RegistryController::new(
            managed(),
            Arc::new(store),
            Arc::new(MockCertificateGenerator::new()),
        );
        let err = controller
            .reconcile(registry("confluent-schema-registry"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses[0].phase, RegistryPhase::Failed);
        assert!(!statuses[0].ready);
        assert!(statuses[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_status_write_failure_keeps_original_error() {
        let mut store = MockClusterStore::new();
        store.expect_get_kafka().returning(|name, ns, _| {
            Err(OperatorError::NotFound {
                kind: "Kafka".to_string(),
                name: name.to_string(),
                namespace: ns.to_string(),
            })
        });
        store
            .expect_patch_registry_status()
            .returning(|_, _, _| Err(OperatorError::KubeApi("conflict".to_string())));

        let controller = RegistryController::new(
            managed(),
            Arc::new(store),
            Arc::new(MockCertificateGenerator::new()),
        );
        let err = controller
            .reconcile(registry("confluent-schema-registry"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::NotFound { .. }));
    }

    #[test]
    fn test_failed_status_keeps_resolved_fields() {
        let mut r = (*registry("confluent-schema-registry")).clone();
        r.status = Some(RegistryStatus {
            ready: true,
            phase: RegistryPhase::Ready,
            bootstrap_server: Some("b:9093".to_string()),
            ..Default::default()
        });
        let status = failed_status(&r, "boom");
        assert_eq!(status.bootstrap_server.as_deref(), Some("b:9093"));
        assert_eq!(status.phase, RegistryPhase::Failed);
        assert_eq!(status.conditions[0].status, CONDITION_FALSE);
    }
}
