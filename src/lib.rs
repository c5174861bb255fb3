//! Strimzi Registry Operator
//!
//! A Kubernetes operator that deploys Confluent Schema Registry instances
//! against a Strimzi-managed Kafka cluster and keeps their TLS credentials
//! current as Strimzi rotates certificates.
//!
//! ## Custom Resources
//!
//! - `StrimziSchemaRegistry`: a Schema Registry Deployment connected to Kafka
//!   through a Strimzi listener, authenticated as the KafkaUser of the same name
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: roundtable.lsst.codes/v1beta1
//! kind: StrimziSchemaRegistry
//! metadata:
//!   name: confluent-schema-registry
//! spec:
//!   strimziVersion: v1beta2
//!   listener: tls
//! ```

pub mod bootstrap;
pub mod certificates;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod deployments;
pub mod error;
pub mod events;
pub mod store;
pub mod strimzi;

pub use certificates::{CertificateGenerator, KubeCertificateGenerator};
pub use config::ManagedRegistries;
pub use controllers::{Controller, RegistryController, SecretWatcher, WatchScope};
pub use crd::{RegistryPhase, RegistrySpec, RegistryStatus, StrimziSchemaRegistry};
pub use error::{OperatorError, Result};
pub use store::{ClusterStore, KubeStore};
