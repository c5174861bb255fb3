//! Strimzi schema compatibility settings of a StrimziSchemaRegistry
//!
//! Both lookups always succeed: a missing setting falls back to a default and
//! logs a warning naming the registry.

use crate::crd::RegistrySpec;
use tracing::warn;

/// Strimzi API version used when a registry does not declare one
pub const DEFAULT_STRIMZI_API_VERSION: &str = "v1beta2";

/// Listener used when a registry does not declare one
pub const DEFAULT_LISTENER_NAME: &str = "tls";

/// Determine the Strimzi API version (e.g. `v1beta2`) for a registry.
///
/// `strimziVersion` wins over the deprecated `strimzi-version` key.
pub fn resolve_api_version(registry_name: &str, spec: &RegistrySpec) -> String {
    if let Some(version) = &spec.strimzi_version {
        return version.clone();
    }

    if let Some(version) = &spec.deprecated_strimzi_version {
        warn!(
            registry = registry_name,
            "The strimzi-version configuration is deprecated. Use strimziVersion instead."
        );
        return version.clone();
    }

    warn!(
        "StrimziSchemaRegistry {} is missing a strimziVersion, using default {}",
        registry_name, DEFAULT_STRIMZI_API_VERSION
    );
    DEFAULT_STRIMZI_API_VERSION.to_string()
}

/// Determine the Kafka listener name (or legacy listener type) for a registry
pub fn resolve_listener_name(registry_name: &str, spec: &RegistrySpec) -> String {
    match &spec.listener {
        Some(listener) => listener.clone(),
        None => {
            warn!(
                "StrimziSchemaRegistry {} is missing a listener name, using default {}",
                registry_name, DEFAULT_LISTENER_NAME
            );
            DEFAULT_LISTENER_NAME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn spec(json: &str) -> RegistrySpec {
        serde_json::from_str(json).unwrap()
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let value = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        (value, logs)
    }

    #[test]
    fn test_api_version_from_new_key() {
        let s = spec(r#"{ "strimziVersion": "v1beta1", "strimzi-version": "v1beta2" }"#);
        assert_eq!(resolve_api_version("registry", &s), "v1beta1");
    }

    #[test]
    fn test_api_version_from_deprecated_key_warns() {
        let s = spec(r#"{ "strimzi-version": "v1beta1" }"#);
        let (version, logs) = capture_logs(|| resolve_api_version("registry", &s));
        assert_eq!(version, "v1beta1");
        assert!(logs.contains("WARN"));
        assert!(logs.contains("deprecated"));
    }

    #[test]
    fn test_api_version_default_warns() {
        let (version, logs) = capture_logs(|| resolve_api_version("my-registry", &spec("{}")));
        assert_eq!(version, "v1beta2");
        assert!(logs.contains("WARN"));
        assert!(logs.contains("my-registry"));
        assert!(logs.contains("v1beta2"));
    }

    #[test]
    fn test_new_key_does_not_warn() {
        let s = spec(r#"{ "strimziVersion": "v1beta2" }"#);
        let (_, logs) = capture_logs(|| resolve_api_version("registry", &s));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_listener_name() {
        let s = spec(r#"{ "listener": "internal-tls" }"#);
        let (listener, logs) = capture_logs(|| resolve_listener_name("registry", &s));
        assert_eq!(listener, "internal-tls");
        assert!(logs.is_empty());
    }

    #[test]
    fn test_listener_name_default_warns() {
        let (listener, logs) = capture_logs(|| resolve_listener_name("my-registry", &spec("{}")));
        assert_eq!(listener, "tls");
        assert!(logs.contains("WARN"));
        assert!(logs.contains("my-registry is missing a listener name, using default tls"));
    }
}
