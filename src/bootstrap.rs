//! Kafka bootstrap address resolution
//!
//! Computes the `host:port` a registry should use to reach a Strimzi Kafka
//! cluster through one of its listeners. Strimzi v1beta1 identifies
//! listeners by type (`tls`, `plain`, `external`); v1beta2 and later declare
//! named listeners in `spec.kafka.listeners` and report them in
//! `status.listeners`, where older v1beta2 releases omit the `name` field.

use crate::crd::kafka::{CurrentKafka, Kafka, ListenerStatus};
use crate::error::{OperatorError, Result};

/// Suggested delay while the Kafka status is not yet populated
const STATUS_RETRY_SECS: u64 = 10;

/// Resolve the bootstrap server for `listener_name` on `kafka`.
///
/// For a legacy (v1beta1) resource `listener_name` is a listener type.
pub fn resolve_bootstrap_server(kafka: &Kafka, listener_name: &str) -> Result<String> {
    match kafka {
        Kafka::Legacy(_) => resolve_legacy(kafka, listener_name),
        Kafka::Current(current) => resolve_current(kafka, current, listener_name),
    }
}

fn resolve_legacy(kafka: &Kafka, listener_type: &str) -> Result<String> {
    let listeners = status_listeners(kafka)?;

    let found = listeners
        .iter()
        .filter(|l| l.type_.as_deref() == Some(listener_type))
        .find_map(format_server_address);
    if let Some(address) = found {
        return Ok(address);
    }

    let types: Vec<&str> = listeners
        .iter()
        .map(|l| l.type_.as_deref().unwrap_or("UNKNOWN"))
        .collect();
    Err(OperatorError::retryable_after(
        format!(
            "Could not find address of a {} listener from the Kafka resource. Available types: {:?}",
            listener_type, types
        ),
        STATUS_RETRY_SECS,
    ))
}

fn resolve_current(kafka: &Kafka, current: &CurrentKafka, listener_name: &str) -> Result<String> {
    let listener_type = match current.listeners().find(|(name, _)| *name == listener_name) {
        Some((_, listener_type)) => listener_type,
        None => {
            let names: Vec<&str> = current.listeners().map(|(name, _)| name).collect();
            return Err(OperatorError::retryable(format!(
                "Listener named {} is not known. Available listeners are {}",
                listener_name,
                names.join(", ")
            )));
        }
    };

    let listeners = status_listeners(kafka)?;

    // An entry matches on its name or on the requested listener's type, in
    // status order, so a listener sharing that type can shadow the named one.
    let found = listeners
        .iter()
        .filter(|l| match l.name.as_deref() {
            Some(name) if name == listener_name => true,
            _ => l.type_.as_deref() == Some(listener_type),
        })
        .find_map(format_server_address);
    if let Some(address) = found {
        return Ok(address);
    }

    let types: Vec<&str> = listeners
        .iter()
        .map(|l| l.type_.as_deref().unwrap_or("UNKNOWN"))
        .collect();
    Err(OperatorError::Fatal(format!(
        "Could not find address of a listener named {} from the Kafka resource. Available names: {}",
        listener_name,
        types.join(", ")
    )))
}

fn status_listeners(kafka: &Kafka) -> Result<&[ListenerStatus]> {
    kafka.status_listeners().ok_or_else(|| {
        OperatorError::retryable_after(
            "Could not get status.listeners from Kafka resource.",
            STATUS_RETRY_SECS,
        )
    })
}

/// `bootstrapServers` verbatim, else the first entry of `addresses`.
///
/// `None` when the entry carries neither.
fn format_server_address(listener: &ListenerStatus) -> Option<String> {
    if let Some(servers) = &listener.bootstrap_servers {
        return Some(servers.clone());
    }
    let address = listener.addresses.as_ref()?.first()?;
    Some(format!("{}:{}", address.host.as_ref()?, address.port?))
}
