//! StrimziSchemaRegistry Custom Resource Definition
//!
//! Declares a Confluent Schema Registry deployment that connects to a
//! Strimzi-managed Kafka cluster over TLS.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// StrimziSchemaRegistry is the Schema for the strimzischemaregistries API
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "roundtable.lsst.codes",
    version = "v1beta1",
    kind = "StrimziSchemaRegistry",
    namespaced,
    status = "RegistryStatus",
    shortname = "ssr",
    printcolumn = r#"{"name":"Listener","type":"string","jsonPath":".status.listener"}"#,
    printcolumn = r#"{"name":"Bootstrap","type":"string","jsonPath":".status.bootstrapServer"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Strimzi API version of the Kafka and KafkaUser resources (e.g. v1beta2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strimzi_version: Option<String>,

    /// Deprecated spelling of `strimziVersion`
    #[serde(
        default,
        rename = "strimzi-version",
        skip_serializing_if = "Option::is_none"
    )]
    pub deprecated_strimzi_version: Option<String>,

    /// Kafka listener to connect through. A listener name for Strimzi
    /// v1beta2 and later, a listener type (tls, plain, external) for v1beta1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<String>,

    /// Kubernetes Service type for the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    /// Schema Registry container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_image: Option<String>,

    /// Default Avro compatibility level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_level: Option<String>,
}

impl RegistrySpec {
    pub fn service_type(&self) -> &str {
        self.service_type.as_deref().unwrap_or(DEFAULT_SERVICE_TYPE)
    }

    pub fn registry_image(&self) -> &str {
        self.registry_image.as_deref().unwrap_or(DEFAULT_REGISTRY_IMAGE)
    }

    pub fn compatibility_level(&self) -> &str {
        self.compatibility_level
            .as_deref()
            .unwrap_or(DEFAULT_COMPATIBILITY_LEVEL)
    }
}

pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
pub const DEFAULT_REGISTRY_IMAGE: &str = "confluentinc/cp-schema-registry:5.3.1";
pub const DEFAULT_COMPATIBILITY_LEVEL: &str = "forward";

/// Status of the StrimziSchemaRegistry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    /// Whether the registry deployment is up to date
    #[serde(default)]
    pub ready: bool,

    /// Current phase of the registry
    #[serde(default)]
    pub phase: RegistryPhase,

    /// Kafka bootstrap server the registry connects to
    #[serde(default)]
    pub bootstrap_server: Option<String>,

    /// Resolved listener name or type
    #[serde(default)]
    pub listener: Option<String>,

    /// Resolved Strimzi API version
    #[serde(default)]
    pub strimzi_version: Option<String>,

    /// resourceVersion of the keystore Secret the deployment was rolled with
    #[serde(default)]
    pub secret_version: Option<String>,

    /// Conditions representing registry state
    #[serde(default)]
    pub conditions: Vec<RegistryCondition>,

    /// Last observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Last update timestamp
    #[serde(default)]
    pub last_updated: Option<String>,

    /// Error message if reconciliation failed
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Phase of the registry lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum RegistryPhase {
    #[default]
    Pending,
    Ready,
    Failed,
}

/// Condition of the registry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_spec_parsing() {
        let json = r#"{
            "strimziVersion": "v1beta2",
            "listener": "tls",
            "serviceType": "NodePort"
        }"#;
        let spec: RegistrySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.strimzi_version.as_deref(), Some("v1beta2"));
        assert_eq!(spec.listener.as_deref(), Some("tls"));
        assert_eq!(spec.service_type(), "NodePort");
        assert!(spec.deprecated_strimzi_version.is_none());
    }

    #[test]
    fn test_deprecated_version_key() {
        let json = r#"{ "strimzi-version": "v1beta1" }"#;
        let spec: RegistrySpec = serde_json::from_str(json).unwrap();
        assert!(spec.strimzi_version.is_none());
        assert_eq!(spec.deprecated_strimzi_version.as_deref(), Some("v1beta1"));
    }

    #[test]
    fn test_spec_defaults() {
        let spec: RegistrySpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.service_type(), DEFAULT_SERVICE_TYPE);
        assert_eq!(spec.registry_image(), DEFAULT_REGISTRY_IMAGE);
        assert_eq!(spec.compatibility_level(), "forward");
    }

    #[test]
    fn test_registry_phase_default() {
        assert_eq!(RegistryPhase::default(), RegistryPhase::Pending);
    }
}
