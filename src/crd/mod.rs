//! Custom Resource Definitions for the Strimzi Registry Operator
//!
//! - StrimziSchemaRegistry: the resource this operator owns
//! - Kafka and KafkaUser: read-only views of Strimzi resources

pub mod kafka;
mod registry;

pub use registry::{
    RegistryCondition, RegistryPhase, RegistrySpec, RegistryStatus, StrimziSchemaRegistry,
};
