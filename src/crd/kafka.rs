//! Views of the Strimzi resources the operator reads
//!
//! Strimzi owns these resources, so they are read as dynamic objects at
//! whatever API version the registry asks for and projected onto the small
//! typed views below. Every status field is optional: the Strimzi operator
//! fills them in asynchronously and older releases omit some of them.

use crate::error::{OperatorError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;

/// API group of the Strimzi custom resources
pub const STRIMZI_GROUP: &str = "kafka.strimzi.io";

/// The legacy API version, whose listeners are identified by type
pub const LEGACY_API_VERSION: &str = "kafka.strimzi.io/v1beta1";

/// Build the `ApiResource` for a Strimzi kind at the given version
pub fn strimzi_api_resource(kind: &str, version: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(STRIMZI_GROUP, version, kind))
}

/// A Strimzi `Kafka` resource in one of the two listener schema generations
#[derive(Debug, Clone)]
pub enum Kafka {
    /// `kafka.strimzi.io/v1beta1`: listeners are keyed by type
    Legacy(LegacyKafka),
    /// `kafka.strimzi.io/v1beta2` and later: listeners are declared by name
    Current(CurrentKafka),
}

impl Kafka {
    /// Interpret a raw Kafka resource by its `apiVersion`
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OperatorError::InvalidState("Kafka resource has no apiVersion".to_string())
            })?;

        if api_version == LEGACY_API_VERSION {
            Ok(Kafka::Legacy(serde_json::from_value(value)?))
        } else {
            Ok(Kafka::Current(serde_json::from_value(value)?))
        }
    }

    pub fn from_dynamic(object: &DynamicObject) -> Result<Self> {
        Self::from_value(serde_json::to_value(object)?)
    }

    /// Listener entries reported in `status.listeners`, if populated
    pub fn status_listeners(&self) -> Option<&[ListenerStatus]> {
        let status = match self {
            Kafka::Legacy(k) => k.status.as_ref(),
            Kafka::Current(k) => k.status.as_ref(),
        };
        status.and_then(|s| s.listeners.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyKafka {
    #[serde(default)]
    pub status: Option<KafkaStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentKafka {
    #[serde(default)]
    pub spec: CurrentKafkaSpec,
    #[serde(default)]
    pub status: Option<KafkaStatus>,
}

impl CurrentKafka {
    /// Declared `(name, type)` pairs, in `spec.kafka.listeners` order.
    ///
    /// Entries missing either field are skipped.
    pub fn listeners(&self) -> impl Iterator<Item = (&str, &str)> {
        self.spec
            .kafka
            .listeners
            .iter()
            .filter_map(|l| Some((l.name.as_deref()?, l.type_.as_deref()?)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentKafkaSpec {
    #[serde(default)]
    pub kafka: KafkaBrokerSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KafkaBrokerSpec {
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
}

/// A `{name, type}` pair from `spec.kafka.listeners`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenerSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KafkaStatus {
    #[serde(default)]
    pub listeners: Option<Vec<ListenerStatus>>,
}

/// One entry of `status.listeners`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub bootstrap_servers: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<ListenerAddress>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListenerAddress {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<i64>,
}

/// The parts of a Strimzi `KafkaUser` the operator consumes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KafkaUser {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<KafkaUserStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KafkaUserStatus {
    /// Name of the Secret holding the user's client certificate
    #[serde(default)]
    pub secret: Option<String>,
}

impl KafkaUser {
    pub fn from_dynamic(object: &DynamicObject) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::to_value(object)?)?)
    }

    /// Name of the client-certificate Secret Strimzi generated for this user
    pub fn secret_name(&self) -> Result<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.secret.as_deref())
            .ok_or_else(|| {
                OperatorError::retryable_after(
                    format!(
                        "KafkaUser {} has no status.secret yet",
                        self.metadata.name.as_deref().unwrap_or("<unnamed>")
                    ),
                    10,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_generation() {
        let kafka = Kafka::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta1",
            "kind": "Kafka",
            "status": { "listeners": [ { "type": "tls" } ] }
        }))
        .unwrap();
        assert!(matches!(kafka, Kafka::Legacy(_)));
        assert_eq!(kafka.status_listeners().map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_current_generation_for_later_versions() {
        for version in ["kafka.strimzi.io/v1beta2", "kafka.strimzi.io/v1"] {
            let kafka = Kafka::from_value(json!({
                "apiVersion": version,
                "kind": "Kafka",
                "spec": { "kafka": { "listeners": [ { "name": "tls", "type": "internal", "port": 9093 } ] } }
            }))
            .unwrap();
            match kafka {
                Kafka::Current(k) => {
                    assert_eq!(k.listeners().collect::<Vec<_>>(), vec![("tls", "internal")])
                }
                Kafka::Legacy(_) => panic!("{} parsed as legacy", version),
            }
        }
    }

    #[test]
    fn test_incomplete_spec_listeners_skipped() {
        let kafka = Kafka::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "spec": { "kafka": { "listeners": [
                { "name": "plain" },
                { "type": "internal" },
                { "name": "tls", "type": "internal", "port": 9093 }
            ] } }
        }))
        .unwrap();
        match kafka {
            Kafka::Current(k) => {
                assert_eq!(k.listeners().collect::<Vec<_>>(), vec![("tls", "internal")])
            }
            Kafka::Legacy(_) => panic!("v1beta2 parsed as legacy"),
        }
    }

    #[test]
    fn test_missing_api_version() {
        let err = Kafka::from_value(json!({ "kind": "Kafka" })).unwrap_err();
        assert!(matches!(err, OperatorError::InvalidState(_)));
    }

    #[test]
    fn test_kafka_user_secret_name() {
        let user: KafkaUser = serde_json::from_value(json!({
            "metadata": { "name": "confluent-schema-registry" },
            "status": { "secret": "confluent-schema-registry", "username": "CN=confluent-schema-registry" }
        }))
        .unwrap();
        assert_eq!(user.secret_name().unwrap(), "confluent-schema-registry");
    }

    #[test]
    fn test_kafka_user_without_status_is_retryable() {
        let user: KafkaUser = serde_json::from_value(json!({
            "metadata": { "name": "confluent-schema-registry" }
        }))
        .unwrap();
        let err = user.secret_name().unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("confluent-schema-registry"));
    }

    #[test]
    fn test_api_resource_plural() {
        let ar = strimzi_api_resource("KafkaUser", "v1beta2");
        assert_eq!(ar.plural, "kafkausers");
        assert_eq!(ar.api_version, "kafka.strimzi.io/v1beta2");
    }
}
