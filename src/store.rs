//! Cluster-state store
//!
//! [`ClusterStore`] is the narrow slice of the Kubernetes API the reconcilers
//! use. [`KubeStore`] implements it with a live client; tests substitute a mock.

use crate::crd::kafka::{strimzi_api_resource, Kafka, KafkaUser};
use crate::crd::{RegistryStatus, StrimziSchemaRegistry};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "strimzi-registry-operator";

/// Trait abstracting the Kubernetes resources the operator reads and writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Get a StrimziSchemaRegistry by name
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<StrimziSchemaRegistry>;

    /// Get a Strimzi Kafka cluster at the given API version (e.g. `v1beta2`)
    async fn get_kafka(&self, name: &str, namespace: &str, api_version: &str) -> Result<Kafka>;

    /// Get a Strimzi KafkaUser at the given API version
    async fn get_kafka_user(
        &self,
        name: &str,
        namespace: &str,
        api_version: &str,
    ) -> Result<KafkaUser>;

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret>;

    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment>;

    /// Apply a JSON merge patch to a Deployment
    async fn patch_deployment(
        &self,
        name: &str,
        namespace: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment>;

    /// Server-side apply a Secret, returning the stored object
    async fn apply_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Server-side apply a Deployment
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Server-side apply a Service
    async fn apply_service(&self, service: &Service) -> Result<Service>;

    /// Merge-patch the status subresource of a StrimziSchemaRegistry
    async fn patch_registry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &RegistryStatus,
    ) -> Result<()>;
}

/// [`ClusterStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, kind: &str, namespace: &str, api_version: &str) -> Api<DynamicObject> {
        let resource = strimzi_api_resource(kind, api_version);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

/// Map a 404 onto [`OperatorError::NotFound`]; everything else is an API error
fn not_found(kind: &str, name: &str, namespace: &str) -> impl FnOnce(kube::Error) -> OperatorError {
    let (kind, name, namespace) = (kind.to_string(), name.to_string(), namespace.to_string());
    move |err| match err {
        kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound {
            kind,
            name,
            namespace,
        },
        e => e.into(),
    }
}

fn object_name<'a>(kind: &str, name: &'a Option<String>) -> Result<&'a str> {
    name.as_deref()
        .ok_or_else(|| OperatorError::InvalidState(format!("{} has no metadata.name", kind)))
}

fn object_namespace<'a>(kind: &str, namespace: &'a Option<String>) -> Result<&'a str> {
    namespace
        .as_deref()
        .ok_or_else(|| OperatorError::InvalidState(format!("{} has no metadata.namespace", kind)))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<StrimziSchemaRegistry> {
        let registries: Api<StrimziSchemaRegistry> =
            Api::namespaced(self.client.clone(), namespace);
        registries
            .get(name)
            .await
            .map_err(not_found("StrimziSchemaRegistry", name, namespace))
    }

    async fn get_kafka(&self, name: &str, namespace: &str, api_version: &str) -> Result<Kafka> {
        let object = self
            .dynamic_api("Kafka", namespace, api_version)
            .get(name)
            .await
            .map_err(not_found("Kafka", name, namespace))?;
        Kafka::from_dynamic(&object)
    }

    async fn get_kafka_user(
        &self,
        name: &str,
        namespace: &str,
        api_version: &str,
    ) -> Result<KafkaUser> {
        let object = self
            .dynamic_api("KafkaUser", namespace, api_version)
            .get(name)
            .await
            .map_err(not_found("KafkaUser", name, namespace))?;
        KafkaUser::from_dynamic(&object)
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Secret> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        secrets
            .get(name)
            .await
            .map_err(not_found("Secret", name, namespace))
    }

    async fn get_deployment(&self, name: &str, namespace: &str) -> Result<Deployment> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        deployments
            .get(name)
            .await
            .map_err(not_found("Deployment", name, namespace))
    }

    async fn patch_deployment(
        &self,
        name: &str,
        namespace: &str,
        patch: &serde_json::Value,
    ) -> Result<Deployment> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        deployments
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(not_found("Deployment", name, namespace))
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<Secret> {
        let name = object_name("Secret", &secret.metadata.name)?;
        let namespace = object_namespace("Secret", &secret.metadata.namespace)?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(secret),
            )
            .await?)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = object_name("Deployment", &deployment.metadata.name)?;
        let namespace = object_namespace("Deployment", &deployment.metadata.namespace)?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(deployments
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(deployment),
            )
            .await?)
    }

    async fn apply_service(&self, service: &Service) -> Result<Service> {
        let name = object_name("Service", &service.metadata.name)?;
        let namespace = object_namespace("Service", &service.metadata.namespace)?;
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(services
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(service),
            )
            .await?)
    }

    async fn patch_registry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &RegistryStatus,
    ) -> Result<()> {
        let registries: Api<StrimziSchemaRegistry> =
            Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        registries
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(not_found("StrimziSchemaRegistry", name, namespace))?;
        Ok(())
    }
}
