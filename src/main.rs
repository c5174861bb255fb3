//! Strimzi Registry Operator
//!
//! This operator deploys Schema Registry instances for a Strimzi Kafka
//! cluster and rolls them when their certificates rotate.
//!
//! ## Usage
//!
//! ```bash
//! # Manage two registries against the "events" cluster
//! SSR_CLUSTER_NAME=events SSR_REGISTRY_NAMES=registry-a,registry-b strimzi-registry-operator
//!
//! # Run with custom log level
//! RUST_LOG=debug strimzi-registry-operator --cluster-name events --registry-names registry-a
//! ```

use clap::Parser;
use kube::Client;
use std::sync::Arc;
use strimzi_registry_operator::{
    CertificateGenerator, ClusterStore, Controller, KubeCertificateGenerator, KubeStore,
    ManagedRegistries, RegistryController, SecretWatcher, WatchScope,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Strimzi Registry Operator
#[derive(Parser, Debug)]
#[command(name = "strimzi-registry-operator")]
#[command(version, about = "Kubernetes Operator for Schema Registries on Strimzi Kafka")]
struct Args {
    /// Name of the Strimzi Kafka cluster
    #[arg(long, env = "SSR_CLUSTER_NAME")]
    cluster_name: String,

    /// StrimziSchemaRegistry names to manage
    #[arg(long, env = "SSR_REGISTRY_NAMES", value_delimiter = ',', default_value = "")]
    registry_names: Vec<String>,

    /// Namespace to watch (empty for all namespaces)
    #[arg(long, env = "SSR_NAMESPACE", default_value = "")]
    namespace: String,
}

fn spawn_controller<C>(controller: Arc<C>, scope: WatchScope) -> tokio::task::JoinHandle<()>
where
    C: Controller + 'static,
{
    tokio::spawn(async move {
        let name = controller.name();
        if let Err(e) = controller.run(scope).await {
            error!("{} controller error: {}", name, e);
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    let registries = Arc::new(ManagedRegistries::new(
        args.cluster_name,
        &args.registry_names,
    )?);

    info!("Starting Strimzi Registry Operator");
    info!(
        cluster = registries.cluster_name(),
        registries = ?registries.registry_names().collect::<Vec<_>>(),
        "Managed registries"
    );
    if registries.is_empty() {
        warn!("No registry names configured; certificate rotations will not be propagated");
    }
    info!(
        "Watching namespace: {}",
        if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        }
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let scope = WatchScope::new(client.clone(), Some(args.namespace));
    let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client));
    let generator: Arc<dyn CertificateGenerator> =
        Arc::new(KubeCertificateGenerator::new(Arc::clone(&store)));

    // Create controllers
    let secret_watcher = Arc::new(SecretWatcher::new(
        Arc::clone(&registries),
        Arc::clone(&store),
        Arc::clone(&generator),
    ));
    let registry_controller = Arc::new(RegistryController::new(
        Arc::clone(&registries),
        Arc::clone(&store),
        Arc::clone(&generator),
    ));

    // Run controllers concurrently
    let secret_handle = spawn_controller(secret_watcher, scope.clone());
    let registry_handle = spawn_controller(registry_controller, scope);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = secret_handle => {
            if let Err(e) = result {
                error!("Secret controller task failed: {}", e);
            }
        }
        result = registry_handle => {
            if let Err(e) = result {
                error!("Registry controller task failed: {}", e);
            }
        }
    }

    info!("Strimzi Registry Operator shutting down");
    Ok(())
}
