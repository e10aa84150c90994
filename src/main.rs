//! Galasa ecosystem operator - provisions Galasa ecosystems on Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use galasa_operator::config::{ControllerConfig, LogFormat};
use galasa_operator::controller::{error_policy, reconcile, Context};
use galasa_operator::crd::GalasaEcosystem;

/// Galasa ecosystem operator - provisions and supervises Galasa ecosystems
#[derive(Parser, Debug)]
#[command(name = "galasa-ecosystem-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches GalasaEcosystem resources and drives each ecosystem's tiers
    /// toward its spec.
    Controller,
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&GalasaEcosystem::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.config.log_format);

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Install or update the GalasaEcosystem CRD with server-side apply
async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing GalasaEcosystem CRD...");
    crds.patch(
        "galasaecosystems.galasa.dev",
        &params,
        &Patch::Apply(&GalasaEcosystem::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install GalasaEcosystem CRD: {}", e))?;

    tracing::info!("GalasaEcosystem CRD installed/updated");
    Ok(())
}

/// Run the GalasaEcosystem controller until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!("Galasa ecosystem operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crds {
        ensure_crds_installed(&client, &config.field_manager).await?;
    }

    let ctx = Arc::new(
        Context::builder(client.clone())
            .field_manager(config.field_manager.clone())
            .testcatalog_fixture(config.testcatalog_fixture.clone())
            .http_timeout(config.http_timeout())
            .build()?,
    );

    let (ecosystems, deployments, statefulsets) = match config.watch_namespace() {
        Some(ns) => {
            tracing::info!(namespace = ns, "Watching a single namespace");
            (
                Api::<GalasaEcosystem>::namespaced(client.clone(), ns),
                Api::<Deployment>::namespaced(client.clone(), ns),
                Api::<StatefulSet>::namespaced(client.clone(), ns),
            )
        }
        None => {
            tracing::info!("Watching all namespaces");
            (
                Api::<GalasaEcosystem>::all(client.clone()),
                Api::<Deployment>::all(client.clone()),
                Api::<StatefulSet>::all(client.clone()),
            )
        }
    };

    tracing::info!("Starting GalasaEcosystem controller...");
    Controller::new(ecosystems, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(statefulsets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Ecosystem reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Ecosystem reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Galasa ecosystem operator shutting down");
    Ok(())
}
