//! Keystore bundle generation
//!
//! Strimzi already publishes PKCS12 stores: `ca.p12` in the cluster CA Secret
//! and `user.p12` in each KafkaUser Secret. The bundle Secret gathers the pair
//! a registry needs, with their passwords, under the names the registry
//! Deployment mounts. A rotation of either input produces a new
//! `resourceVersion` on the bundle, which is the token used to roll the
//! registry pods.

use crate::config::cluster_ca_secret_name;
use crate::crd::StrimziSchemaRegistry;
use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const KEYSTORE_KEY: &str = "keystore.p12";
pub const KEYSTORE_PASSWORD_KEY: &str = "keystore_password";
pub const TRUSTSTORE_KEY: &str = "truststore.p12";
pub const TRUSTSTORE_PASSWORD_KEY: &str = "truststore_password";
pub const CA_CERT_KEY: &str = "ca.crt";

/// Which rotated Secret triggered the generation
#[derive(Debug, Clone)]
pub enum CertificateSource {
    /// The cluster CA certificate Secret
    ClusterCa(Secret),
    /// The KafkaUser client certificate Secret
    ClientSecret(Secret),
}

/// Everything needed to build one registry's keystore bundle
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// Name of the KafkaUser Secret holding the client certificate
    pub credential_secret_name: String,
    pub namespace: String,
    /// Strimzi Kafka cluster name
    pub cluster: String,
    /// Registry that owns the bundle
    pub owner: StrimziSchemaRegistry,
    pub source: CertificateSource,
}

/// Produces the keystore/truststore Secret for a registry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateGenerator: Send + Sync {
    /// Create or update the bundle Secret and return it as stored
    async fn generate_secret(&self, request: CertificateRequest) -> Result<Secret>;
}

/// Name of the bundle Secret derived from a KafkaUser Secret
pub fn bundle_secret_name(credential_secret_name: &str) -> String {
    format!("{}-keystores", credential_secret_name)
}

/// The opaque version token of a stored Secret
pub fn secret_version(secret: &Secret) -> Result<String> {
    secret.metadata.resource_version.clone().ok_or_else(|| {
        OperatorError::InvalidState(format!(
            "Secret {} has no resourceVersion",
            secret.name_any()
        ))
    })
}

/// [`CertificateGenerator`] that assembles the bundle from Strimzi's PKCS12 stores
pub struct KubeCertificateGenerator {
    store: Arc<dyn ClusterStore>,
}

impl KubeCertificateGenerator {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Fetch whichever of the CA and client Secrets the request did not carry
    async fn resolve_inputs(&self, request: &CertificateRequest) -> Result<(Secret, Secret)> {
        match &request.source {
            CertificateSource::ClusterCa(ca) => {
                let client = self
                    .store
                    .get_secret(&request.credential_secret_name, &request.namespace)
                    .await?;
                Ok((ca.clone(), client))
            }
            CertificateSource::ClientSecret(client) => {
                let ca = self
                    .store
                    .get_secret(&cluster_ca_secret_name(&request.cluster), &request.namespace)
                    .await?;
                Ok((ca, client.clone()))
            }
        }
    }
}

#[async_trait]
impl CertificateGenerator for KubeCertificateGenerator {
    async fn generate_secret(&self, request: CertificateRequest) -> Result<Secret> {
        let (ca_secret, client_secret) = self.resolve_inputs(&request).await?;
        let bundle = build_bundle_secret(&request, &ca_secret, &client_secret)?;

        debug!(
            "Applying keystore bundle {}/{}",
            request.namespace,
            bundle.name_any()
        );
        let stored = self.store.apply_secret(&bundle).await?;
        info!(
            secret = %stored.name_any(),
            version = stored.metadata.resource_version.as_deref().unwrap_or(""),
            "Keystore bundle up to date"
        );
        Ok(stored)
    }
}

fn data_key(secret: &Secret, key: &str) -> Result<ByteString> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
        .ok_or_else(|| {
            OperatorError::retryable_after(
                format!("Secret {} has no {} entry yet", secret.name_any(), key),
                10,
            )
        })
}

/// Build the bundle Secret from the cluster CA and KafkaUser Secrets
pub fn build_bundle_secret(
    request: &CertificateRequest,
    ca_secret: &Secret,
    client_secret: &Secret,
) -> Result<Secret> {
    let mut data = BTreeMap::new();
    data.insert(KEYSTORE_KEY.to_string(), data_key(client_secret, "user.p12")?);
    data.insert(
        KEYSTORE_PASSWORD_KEY.to_string(),
        data_key(client_secret, "user.password")?,
    );
    data.insert(TRUSTSTORE_KEY.to_string(), data_key(ca_secret, "ca.p12")?);
    data.insert(
        TRUSTSTORE_PASSWORD_KEY.to_string(),
        data_key(ca_secret, "ca.password")?,
    );
    data.insert(CA_CERT_KEY.to_string(), data_key(ca_secret, "ca.crt")?);

    let owner = &request.owner;
    let owner_ref = OwnerReference {
        api_version: StrimziSchemaRegistry::api_version(&()).to_string(),
        kind: StrimziSchemaRegistry::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "strimzi-registry-operator".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), owner.name_any());

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(bundle_secret_name(&request.credential_secret_name)),
            namespace: Some(request.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}
