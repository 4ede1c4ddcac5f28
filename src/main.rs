use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use operator_deployer::cli::{Cli, Command};
use operator_deployer::{
    AnyInstaller, DeployerConfig, DeploymentRegistry, Installer, KubeCluster,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("operator_deployer=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let action = cli.command.name();

    let config = DeployerConfig::load()?;
    config.validate()?;
    info!(
        namespace = %config.namespace,
        scope = %config.scope,
        strategy = %config.strategy,
        action = %action,
        "Starting operator-deployer"
    );

    let cluster = KubeCluster::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let mut registry = DeploymentRegistry::new();
    registry.claim(&config.namespace)?;
    let mut installer = AnyInstaller::from_config(cluster, &config)?;

    let outcome = tokio::select! {
        result = run(&cli.command, &mut installer, &mut registry, &config.namespace) => Some(result),
        _ = shutdown_signal() => None,
    };

    match outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => {
            error!(error = %e, action = %action, "Operator lifecycle action failed");
            Err(e)
        }
        None => {
            warn!(action = %action, "Interrupted, removing partially installed operator");
            if cli.command.rolls_back_on_interrupt() {
                if let Err(e) = installer.undeploy(false).await {
                    error!(error = %e, "Cleanup after interrupt failed");
                }
            }
            Err("interrupted".into())
        }
    }
}

async fn run(
    command: &Command,
    installer: &mut AnyInstaller<KubeCluster>,
    registry: &mut DeploymentRegistry,
    namespace: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Deploy => {
            let handle = installer.deploy(true).await?;
            info!(
                namespace = %handle.deployment_namespace(),
                name = ?handle.resolved_name(),
                state = %handle.state(),
                "Operator deployed"
            );
            registry.record(handle);
        }
        Command::Undeploy => {
            installer.undeploy(true).await?;
            registry.release(namespace);
            info!(namespace = %namespace, "Operator undeployed");
        }
        Command::Upgrade {
            channel,
            catalog_image,
        } => {
            installer.adopt().await?;
            let handle = installer.upgrade(channel, catalog_image).await?;
            info!(
                namespace = %handle.deployment_namespace(),
                channel = ?handle.channel(),
                csv = ?handle.installed_csv(),
                "Operator upgraded"
            );
            registry.record(handle);
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
