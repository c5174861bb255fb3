//! Schema Registry Deployment and Service manifests, and the rollout trigger
//!
//! The pod template carries a `jksVersion` annotation holding the
//! `resourceVersion` of the keystore bundle Secret. Changing it changes the
//! pod template, so Kubernetes rolls the registry pods onto the new
//! credentials.

use crate::certificates::{
    KEYSTORE_PASSWORD_KEY, KEYSTORE_KEY, TRUSTSTORE_KEY, TRUSTSTORE_PASSWORD_KEY,
};
use crate::crd::StrimziSchemaRegistry;
use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, SecretKeySelector, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

/// Pod template annotation holding the keystore bundle's resourceVersion
pub const JKS_VERSION_ANNOTATION: &str = "strimziregistryoperator.roundtable.lsst.codes/jksVersion";

pub const REGISTRY_PORT: i32 = 8081;
const REGISTRY_PORT_NAME: &str = "schema-registry";
const TLS_MOUNT_PATH: &str = "/var/schemaregistry";

fn app_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), name.to_string());
    labels
}

fn owner_reference(registry: &StrimziSchemaRegistry) -> OwnerReference {
    OwnerReference {
        api_version: StrimziSchemaRegistry::api_version(&()).to_string(),
        kind: StrimziSchemaRegistry::kind(&()).to_string(),
        name: registry.name_any(),
        uid: registry.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn env_from_secret(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn registry_container(
    registry: &StrimziSchemaRegistry,
    bootstrap_server: &str,
    secret_name: &str,
) -> Container {
    let env_vars = vec![
        EnvVar {
            name: "SCHEMA_REGISTRY_HOST_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "status.podIP".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env(
            "SCHEMA_REGISTRY_LISTENERS",
            format!("http://0.0.0.0:{}", REGISTRY_PORT),
        ),
        env("SCHEMA_REGISTRY_KAFKASTORE_BOOTSTRAP_SERVERS", bootstrap_server),
        env(
            "SCHEMA_REGISTRY_AVRO_COMPATIBILITY_LEVEL",
            registry.spec.compatibility_level(),
        ),
        env("SCHEMA_REGISTRY_MASTER_ELIGIBILITY", "true"),
        env("SCHEMA_REGISTRY_HEAP_OPTS", "-Xms512M -Xmx512M"),
        env("SCHEMA_REGISTRY_KAFKASTORE_TOPIC", "registry-schemas"),
        env(
            "SCHEMA_REGISTRY_KAFKASTORE_SSL_KEYSTORE_LOCATION",
            format!("{}/{}", TLS_MOUNT_PATH, KEYSTORE_KEY),
        ),
        env("SCHEMA_REGISTRY_KAFKASTORE_SSL_KEYSTORE_TYPE", "PKCS12"),
        env_from_secret(
            "SCHEMA_REGISTRY_KAFKASTORE_SSL_KEYSTORE_PASSWORD",
            secret_name,
            KEYSTORE_PASSWORD_KEY,
        ),
        env_from_secret(
            "SCHEMA_REGISTRY_KAFKASTORE_SSL_KEY_PASSWORD",
            secret_name,
            KEYSTORE_PASSWORD_KEY,
        ),
        env(
            "SCHEMA_REGISTRY_KAFKASTORE_SSL_TRUSTSTORE_LOCATION",
            format!("{}/{}", TLS_MOUNT_PATH, TRUSTSTORE_KEY),
        ),
        env("SCHEMA_REGISTRY_KAFKASTORE_SSL_TRUSTSTORE_TYPE", "PKCS12"),
        env_from_secret(
            "SCHEMA_REGISTRY_KAFKASTORE_SSL_TRUSTSTORE_PASSWORD",
            secret_name,
            TRUSTSTORE_PASSWORD_KEY,
        ),
        env("SCHEMA_REGISTRY_KAFKASTORE_SECURITY_PROTOCOL", "SSL"),
    ];

    Container {
        name: "server".to_string(),
        image: Some(registry.spec.registry_image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some(REGISTRY_PORT_NAME.to_string()),
            container_port: REGISTRY_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(env_vars),
        volume_mounts: Some(vec![VolumeMount {
            name: "tls".to_string(),
            mount_path: TLS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Build the registry Deployment.
///
/// `secret_name` is the keystore bundle Secret and `secret_version` its
/// resourceVersion.
pub fn build_deployment(
    registry: &StrimziSchemaRegistry,
    bootstrap_server: &str,
    secret_name: &str,
    secret_version: &str,
) -> Deployment {
    let name = registry.name_any();
    let labels = app_labels(&name);

    let mut annotations = BTreeMap::new();
    annotations.insert(
        JKS_VERSION_ANNOTATION.to_string(),
        secret_version.to_string(),
    );

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![registry_container(registry, bootstrap_server, secret_name)],
            volumes: Some(vec![Volume {
                name: "tls".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: registry.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(registry)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service exposing the registry's HTTP port
pub fn build_service(registry: &StrimziSchemaRegistry) -> Service {
    let name = registry.name_any();

    let mut labels = BTreeMap::new();
    labels.insert("name".to_string(), name.clone());

    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: registry.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(registry)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(registry.spec.service_type().to_string()),
            ports: Some(vec![ServicePort {
                name: Some(REGISTRY_PORT_NAME.to_string()),
                port: REGISTRY_PORT,
                ..Default::default()
            }]),
            selector: Some(app_labels(&name)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Point the Deployment's pod template at a new keystore bundle version and
/// patch it, triggering a rolling restart.
///
/// Always writes, even when the annotation already holds `secret_version`.
pub async fn refresh_deployment(
    store: &dyn ClusterStore,
    deployment: &mut Deployment,
    secret_version: &str,
    name: &str,
    namespace: &str,
) -> Result<Deployment> {
    deployment
        .spec
        .as_mut()
        .ok_or_else(|| OperatorError::InvalidState(format!("Deployment {} has no spec", name)))?
        .template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            JKS_VERSION_ANNOTATION.to_string(),
            secret_version.to_string(),
        );

    let mut annotations = serde_json::Map::new();
    annotations.insert(
        JKS_VERSION_ANNOTATION.to_string(),
        serde_json::Value::String(secret_version.to_string()),
    );
    let patch = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": annotations
                }
            }
        }
    });

    let patched = store.patch_deployment(name, namespace, &patch).await?;
    info!(
        "Refreshed Deployment {}/{} with keystore version {}",
        namespace, name, secret_version
    );
    Ok(patched)
}

/// The keystore version a Deployment's pod template currently carries
#[cfg(test)]
pub(crate) fn deployed_secret_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(JKS_VERSION_ANNOTATION)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RegistrySpec;
    use crate::store::MockClusterStore;

    fn registry() -> StrimziSchemaRegistry {
        let mut r = StrimziSchemaRegistry::new(
            "confluent-schema-registry",
            RegistrySpec {
                service_type: Some("NodePort".to_string()),
                ..Default::default()
            },
        );
        r.metadata.namespace = Some("events".to_string());
        r.metadata.uid = Some("uid-1".to_string());
        r
    }

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a EnvVar> {
        container.env.as_ref()?.iter().find(|e| e.name == name)
    }

    #[test]
    fn test_build_deployment() {
        let dep = build_deployment(
            &registry(),
            "events-kafka-bootstrap.events.svc:9093",
            "confluent-schema-registry-keystores",
            "1234",
        );

        assert_eq!(dep.metadata.name.as_deref(), Some("confluent-schema-registry"));
        assert_eq!(dep.metadata.namespace.as_deref(), Some("events"));
        assert_eq!(deployed_secret_version(&dep), Some("1234"));

        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(
            env_value(container, "SCHEMA_REGISTRY_KAFKASTORE_BOOTSTRAP_SERVERS")
                .and_then(|e| e.value.as_deref()),
            Some("events-kafka-bootstrap.events.svc:9093")
        );
        let password = env_value(container, "SCHEMA_REGISTRY_KAFKASTORE_SSL_TRUSTSTORE_PASSWORD")
            .and_then(|e| e.value_from.as_ref())
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(password.name, "confluent-schema-registry-keystores");
        assert_eq!(password.key, "truststore_password");

        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()),
            Some("confluent-schema-registry-keystores")
        );
    }

    #[test]
    fn test_build_service() {
        let svc = build_service(&registry());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap()[0].port, 8081);
        assert_eq!(
            spec.selector.unwrap().get("app").map(String::as_str),
            Some("confluent-schema-registry")
        );
    }

    #[tokio::test]
    async fn test_refresh_deployment_patches_template_annotation() {
        let mut store = MockClusterStore::new();
        store
            .expect_patch_deployment()
            .withf(|name, ns, patch| {
                name == "confluent-schema-registry"
                    && ns == "events"
                    && patch["spec"]["template"]["metadata"]["annotations"]
                        [JKS_VERSION_ANNOTATION]
                        == "5678"
            })
            .times(1)
            .returning(|_, _, _| Ok(Deployment::default()));

        let mut dep = build_deployment(&registry(), "h:9093", "s", "1234");
        refresh_deployment(&store, &mut dep, "5678", "confluent-schema-registry", "events")
            .await
            .unwrap();
        assert_eq!(deployed_secret_version(&dep), Some("5678"));
    }

    #[tokio::test]
    async fn test_refresh_deployment_writes_unchanged_version() {
        let mut store = MockClusterStore::new();
        store
            .expect_patch_deployment()
            .times(1)
            .returning(|_, _, _| Ok(Deployment::default()));

        let mut dep = build_deployment(&registry(), "h:9093", "s", "1234");
        refresh_deployment(&store, &mut dep, "1234", "confluent-schema-registry", "events")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_deployment_without_spec() {
        let store = MockClusterStore::new();
        let mut dep = Deployment::default();
        let err = refresh_deployment(&store, &mut dep, "1", "x", "events")
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::InvalidState(_)));
    }
}
