use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_label_annotator::controller::{run_watcher, EventGate};
use image_label_annotator::labels::{Annotator, LabelResolver, WorkloadAnnotator};
use image_label_annotator::oci::OciClient;
use image_label_annotator::registry::KubeSecretStore;
use image_label_annotator::settings::Settings;
use image_label_annotator::workload::KubeDeploymentStore;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Api;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch Deployments and annotate them with their images' labels
    Run,
    /// Annotate a single Deployment once
    Annotate {
        /// Deployment name
        name: String,
        /// Namespace of the Deployment
        #[arg(long, short, default_value = "default")]
        namespace: String,
    },
    /// Print the labels of an image as JSON
    Labels {
        /// Image reference (e.g., nginx:1.25, ghcr.io/org/app@sha256:...)
        image: String,
        /// Namespace the pull secrets live in
        #[arg(long, short, default_value = "default")]
        namespace: String,
        /// Image pull secret to try, in order (repeatable)
        #[arg(long = "secret", short)]
        secrets: Vec<String>,
    },
    /// Validate the configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let cli = Cli::parse();

    if let Commands::CheckConfig = cli.command {
        println!("Checking configuration...");
        match Settings::new() {
            Ok(settings) => {
                println!("✓ Configuration is valid");
                println!("  enabled: {}", settings.enabled);
                println!("  fallback registry: {}", settings.registry.fallback_url);
                println!("  annotation mode: {:?}", settings.annotations.mode);
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let settings = Settings::new().context("Failed to load settings")?;
    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    match cli.command {
        Commands::Run => run(settings, kube_client).await,
        Commands::Annotate { name, namespace } => {
            let annotator = build_annotator(&settings, kube_client.clone());
            let deploy_api: Api<Deployment> = Api::namespaced(kube_client, &namespace);
            let deployment = deploy_api
                .get(&name)
                .await
                .with_context(|| format!("Failed to get deployment {}/{}", namespace, name))?;

            let annotations = annotator
                .annotate(&deployment, &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&annotations)?);
            Ok(())
        }
        Commands::Labels {
            image,
            namespace,
            secrets,
        } => {
            let annotator = build_annotator(&settings, kube_client);
            let labels = annotator
                .resolver()
                .resolve(&namespace, &image, &secrets, &CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&labels)?);
            Ok(())
        }
        Commands::CheckConfig => Ok(()),
    }
}

fn build_annotator(settings: &Settings, kube_client: kube::Client) -> Annotator {
    let resolver = LabelResolver::new(
        Arc::new(KubeSecretStore::new(kube_client.clone())),
        Arc::new(OciClient::default()),
        settings.registry.fallback_url.clone(),
        settings.attempt_timeout(),
    );
    let workloads = Arc::new(KubeDeploymentStore::new(
        kube_client,
        settings.workload.max_conflict_retries,
    ));
    Annotator::new(resolver, workloads, settings.annotation_policy())
}

/// Run the Deployment watcher until SIGINT/SIGTERM, reloading on SIGHUP
async fn run(settings: Settings, kube_client: kube::Client) -> Result<()> {
    let annotator = Arc::new(build_annotator(&settings, kube_client.clone()));
    let gate = Arc::new(EventGate::new(annotator));
    gate.configure(settings.gate_config());

    let shutdown = CancellationToken::new();

    #[cfg(unix)]
    let reload_handle = tokio::spawn(reload_on_hangup(
        gate.clone(),
        settings.clone(),
        shutdown.clone(),
    ));

    let watcher_handle = tokio::spawn(run_watcher(
        kube_client,
        gate.clone(),
        settings.watch.namespace.clone(),
        shutdown.clone(),
    ));

    shutdown_signal().await;
    gate.shutdown();
    shutdown.cancel();

    #[cfg(unix)]
    let _ = reload_handle.await;

    watcher_handle
        .await
        .context("Deployment watcher task panicked")??;
    info!("Shutdown complete");
    Ok(())
}

/// Re-read settings on SIGHUP and install the new gate snapshot
///
/// Only `enabled` takes effect without a restart.
#[cfg(unix)]
async fn reload_on_hangup(gate: Arc<EventGate>, mut current: Settings, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, configuration reload disabled: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = hangup.recv() => {
                if received.is_none() {
                    return;
                }
            }
        }

        info!("Received SIGHUP, reloading configuration");
        match Settings::new() {
            Ok(settings) => {
                gate.configure(settings.gate_config());
                let mut restart_only = settings.clone();
                restart_only.enabled = current.enabled;
                if restart_only != current {
                    warn!("Settings other than 'enabled' changed; restart to apply them");
                }
                current = settings;
            }
            Err(e) => {
                error!("Configuration reload failed, keeping previous settings: {}", e);
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
