use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use stopper::Stopper;
use tracing::Instrument;

use chaosctl::{
    config::Config,
    lifecycle::{FieldPolicy, LifecycleController},
    object::{ManagedObject, ObjectId},
    store::{KubeStore, Propagation},
    wait::{WaitCondition, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT},
};

#[derive(Parser, Debug)]
struct Cli {
    #[clap(subcommand)]
    subcommand: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply chaos manifests via server-side apply
    Apply(ApplyArgs),
    /// Fetch one object and print it as YAML
    Get(GetArgs),
    /// Delete one object
    Delete(DeleteArgs),
    /// Render canonical manifests without contacting the cluster
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct ApplyArgs {
    #[clap(value_parser)]
    manifest_paths: Vec<PathBuf>,
    /// Field manager to attribute applied fields to
    #[clap(long)]
    field_manager: Option<String>,
    /// Override fields owned by other managers
    #[clap(long)]
    force_conflicts: bool,
    /// Condition to wait for after each apply, as `path` or `path=value`
    #[clap(long = "wait-for")]
    wait_for: Vec<String>,
    /// Wait deadline in seconds; 0 checks once without retrying
    #[clap(long)]
    wait_timeout: Option<u64>,
    /// Seconds between wait condition checks
    #[clap(long)]
    poll_interval: Option<u64>,
}

#[derive(Args, Debug)]
struct GetArgs {
    /// Resource kind, e.g. NetworkChaos
    kind: String,
    /// Object identifier as `<namespace>/<name>`
    id: String,
}

#[derive(Args, Debug)]
struct DeleteArgs {
    kind: String,
    /// Object identifier as `<namespace>/<name>`
    id: String,
    #[clap(long, value_enum)]
    propagation: Option<PropagationArg>,
    /// Wait until the object is gone
    #[clap(long)]
    wait: bool,
    #[clap(long)]
    wait_timeout: Option<u64>,
    #[clap(long)]
    poll_interval: Option<u64>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[clap(value_parser)]
    manifest_paths: Vec<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PropagationArg {
    Orphan,
    Background,
    Foreground,
}

impl From<PropagationArg> for Propagation {
    fn from(value: PropagationArg) -> Self {
        match value {
            PropagationArg::Orphan => Propagation::Orphan,
            PropagationArg::Background => Propagation::Background,
            PropagationArg::Foreground => Propagation::Foreground,
        }
    }
}

/// Generate future that awaits shutdown signal
async fn shutdown_signal(stopper: Stopper) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("terminate signal received");
    stopper.stop();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .compact()
        .without_time()
        .init();

    let config = Config::try_from_env().context("failed to read configuration from environment")?;
    let cli = Cli::parse();

    let stopper = Stopper::new();
    tokio::spawn(shutdown_signal(stopper.clone()));

    match cli.subcommand {
        Commands::Apply(args) => cli_apply(config, stopper, args).await,
        Commands::Get(args) => cli_get(config, stopper, args).await,
        Commands::Delete(args) => cli_delete(config, stopper, args).await,
        Commands::Render(args) => cli_render(config, args).await,
    }
}

async fn build_controller(
    config: Config,
    stopper: Stopper,
) -> Result<LifecycleController<KubeStore>> {
    if config.offline {
        return Ok(LifecycleController::offline(config).with_stopper(stopper));
    }
    let kube_config = kube::Config::infer()
        .await
        .context("failed to infer Kubernetes configuration")?;
    let client: kube::Client = kube_config
        .try_into()
        .context("failed to build Kubernetes client")?;
    Ok(LifecycleController::new(config, KubeStore::new(client)).with_stopper(stopper))
}

fn load_manifests(paths: &[PathBuf]) -> Result<Vec<ManagedObject>> {
    let mut objects = Vec::new();
    for path in paths {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest file {}", path.display()))?;
        for document in serde_yaml::Deserializer::from_str(&contents) {
            let object = ManagedObject::deserialize(document)
                .with_context(|| format!("failed to parse manifest in {}", path.display()))?;
            objects.push(object);
        }
    }
    Ok(objects)
}

fn wait_conditions(
    flags: &[String],
    timeout: Option<u64>,
    poll_interval: Option<u64>,
) -> Result<Vec<WaitCondition>> {
    let timeout = timeout.map_or(DEFAULT_TIMEOUT, Duration::from_secs);
    let poll_interval = poll_interval.map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs);
    flags
        .iter()
        .map(|flag| {
            Ok(WaitCondition::parse_flag(flag)?
                .with_timeout(timeout)
                .with_poll_interval(poll_interval))
        })
        .collect()
}

async fn cli_apply(config: Config, stopper: Stopper, args: ApplyArgs) -> Result<()> {
    let controller = build_controller(config, stopper).await?;
    let policy = FieldPolicy {
        field_manager: args.field_manager.clone(),
        force_conflicts: args.force_conflicts.then_some(true),
    };
    let conditions = wait_conditions(&args.wait_for, args.wait_timeout, args.poll_interval)?;

    for object in load_manifests(&args.manifest_paths)? {
        let id = object.object_id()?;
        let kind = object.kind().unwrap_or("<unknown>").to_string();
        let apply_span = tracing::info_span!("apply", %kind, %id);
        controller
            .create(&object, &policy, &conditions)
            .instrument(apply_span)
            .await
            .with_context(|| format!("failed to apply {kind} `{id}`"))?;
        println!("{kind}/{id} applied");
    }
    Ok(())
}

async fn cli_get(config: Config, stopper: Stopper, args: GetArgs) -> Result<()> {
    let controller = build_controller(config, stopper).await?;
    let id = ObjectId::parse(&args.id)?;
    let object = controller.read(&args.kind, &id).await?;
    print!("{}", object.to_yaml()?);
    Ok(())
}

async fn cli_delete(config: Config, stopper: Stopper, args: DeleteArgs) -> Result<()> {
    let controller = build_controller(config, stopper).await?;
    let id = ObjectId::parse(&args.id)?;
    let condition = args.wait.then(|| {
        let mut condition = WaitCondition::deleted();
        if let Some(timeout) = args.wait_timeout {
            condition = condition.with_timeout(Duration::from_secs(timeout));
        }
        if let Some(poll_interval) = args.poll_interval {
            condition = condition.with_poll_interval(Duration::from_secs(poll_interval));
        }
        condition
    });
    controller
        .delete(
            &args.kind,
            &id,
            args.propagation.map(Into::into),
            condition.as_ref(),
        )
        .await?;
    println!("{}/{} deleted", args.kind, id);
    Ok(())
}

async fn cli_render(config: Config, args: RenderArgs) -> Result<()> {
    // Rendering never needs the cluster, even when a connection is
    // configured.
    let controller = LifecycleController::<KubeStore>::offline(config);
    let mut first = true;
    for object in load_manifests(&args.manifest_paths)? {
        let yaml = controller.render(&object).with_context(|| {
            format!(
                "failed to render manifest for `{}`",
                object.metadata.name.as_deref().unwrap_or("<unnamed>")
            )
        })?;
        if !first {
            println!("---");
        }
        print!("{yaml}");
        first = false;
    }
    Ok(())
}
