//! Kubernetes-standard status condition helpers
//!
//! Provides constants and builder functions for the StrimziSchemaRegistry
//! status conditions, following the Kubernetes API conventions.

use crate::crd::RegistryCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// StrimziSchemaRegistry condition types
pub const REGISTRY_CONDITION_READY: &str = "Ready";
pub const REGISTRY_CONDITION_CERTIFICATES_READY: &str = "CertificatesReady";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> RegistryCondition {
    RegistryCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<RegistryCondition>, new: RegistryCondition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}
