use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tk_farm_config::StackConfig;
use tk_farm_emulator::{LocalCloud, Scheme};
use tk_farm_engine::{
  ChannelNotifier, Deployment, DeploymentEvent, Engine, FsStateStore, StateStore,
};
use tk_farm_stack::{
  FrontendStack, OUTPUT_BUCKET_NAME, OUTPUT_DEPLOY_USER_NAME, OUTPUT_DISTRIBUTION_DOMAIN_NAME,
  OUTPUT_DISTRIBUTION_ID, Template, validate,
};

mod publish;

use publish::{PublishTarget, publish};

/// tk-farm - Static frontend hosting, provisioned and published locally
#[derive(Parser)]
#[command(name = "tk-farm")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tk-farm)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Stack config file (JSON). Defaults are used when omitted
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Account id to deploy into
  #[arg(long, global = true, env = "TK_FARM_ACCOUNT")]
  account: Option<String>,

  /// Region to deploy into
  #[arg(long, global = true, env = "TK_FARM_REGION")]
  region: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Print the synthesized template
  Synth,

  /// Show what deploy would change
  Plan,

  /// Validate the template and apply it to the local cloud
  Deploy,

  /// Delete every resource of the stack
  Destroy,

  /// Print the stack outputs as JSON
  Outputs,

  /// Upload a directory as the deploy user and invalidate the distribution
  Publish {
    /// Directory holding the built site
    dir: PathBuf,
  },

  /// Request a path through the distribution
  Fetch {
    /// Path to request
    #[arg(default_value = "/")]
    path: String,

    /// Use plain HTTP instead of HTTPS
    #[arg(long)]
    http: bool,
  },
}

/// Everything a command needs, resolved from flags and the data directory.
struct Workspace {
  config: StackConfig,
  store: FsStateStore,
  cloud_path: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tk-farm"),
  };

  let Some(command) = cli.command else {
    println!("tk-farm - use --help to see available commands");
    return Ok(());
  };

  let config = load_config(cli.config.as_deref(), cli.account, cli.region)?;
  let ctx = Workspace {
    config,
    store: FsStateStore::new(data_dir.join("state")),
    cloud_path: data_dir.join("cloud.json"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Synth => synth(&ctx),
      Commands::Plan => plan(&ctx).await,
      Commands::Deploy => deploy(&ctx).await,
      Commands::Destroy => destroy(&ctx).await,
      Commands::Outputs => outputs(&ctx).await,
      Commands::Publish { dir } => publish_dir(&ctx, &dir).await,
      Commands::Fetch { path, http } => fetch(&ctx, &path, http).await,
    }
  })
}

fn load_config(path: Option<&Path>, account: Option<String>, region: Option<String>) -> Result<StackConfig> {
  let mut config = match path {
    Some(path) => {
      let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      StackConfig::from_json(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?
    }
    None => StackConfig::default(),
  };

  if let Some(account) = account {
    config.account_id = account;
  }
  if let Some(region) = region {
    config.region = region;
  }
  config.validate().context("invalid stack config")?;
  Ok(config)
}

/// Stack name and template for the configured frontend.
fn synthesize(config: &StackConfig) -> Result<(String, Template)> {
  let stack = FrontendStack::build(config).context("failed to declare stack")?;
  let template = stack.synth().context("failed to synthesize stack")?;
  Ok((stack.name().to_string(), template))
}

async fn load_cloud(ctx: &Workspace) -> Result<LocalCloud> {
  let cloud = LocalCloud::load(&ctx.cloud_path)
    .await
    .with_context(|| format!("failed to load local cloud: {}", ctx.cloud_path.display()))?
    .unwrap_or_else(|| LocalCloud::new(&ctx.config.account_id, &ctx.config.region));

  if cloud.account_id() != ctx.config.account_id || cloud.region() != ctx.config.region {
    bail!(
      "local cloud at {} belongs to {} in {}, not {} in {}",
      ctx.cloud_path.display(),
      cloud.account_id(),
      cloud.region(),
      ctx.config.account_id,
      ctx.config.region
    );
  }
  Ok(cloud)
}

async fn save_cloud(ctx: &Workspace, cloud: &LocalCloud) -> Result<()> {
  cloud
    .save(&ctx.cloud_path)
    .await
    .with_context(|| format!("failed to save local cloud: {}", ctx.cloud_path.display()))
}

async fn load_deployment(ctx: &Workspace, stack_name: &str) -> Result<Option<Deployment>> {
  ctx
    .store
    .load(stack_name)
    .await
    .with_context(|| format!("failed to load state for {}", stack_name))
}

/// A deployment that must exist for the command to make sense.
async fn require_deployment(ctx: &Workspace) -> Result<Deployment> {
  let (stack_name, _) = synthesize(&ctx.config)?;
  load_deployment(ctx, &stack_name)
    .await?
    .with_context(|| format!("stack {} is not deployed", stack_name))
}

fn require_output<'a>(deployment: &'a Deployment, name: &str) -> Result<&'a str> {
  deployment
    .output(name)
    .with_context(|| format!("stack {} has no output {}", deployment.stack_name, name))
}

fn synth(ctx: &Workspace) -> Result<()> {
  let (_, template) = synthesize(&ctx.config)?;
  println!("{}", template.to_json_pretty()?);
  Ok(())
}

async fn plan(ctx: &Workspace) -> Result<()> {
  let (stack_name, template) = synthesize(&ctx.config)?;
  let previous = load_deployment(ctx, &stack_name).await?;
  let plan = tk_farm_engine::plan(&template, previous.as_ref()).context("failed to plan")?;
  print!("{}", plan);
  Ok(())
}

/// Cancel the token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Interrupted, rolling back...");
      token.cancel();
    }
  });
  cancel
}

/// An engine whose events are printed to stderr as they arrive.
fn engine_with_progress(cloud: Arc<LocalCloud>) -> (Engine, tokio::task::JoinHandle<()>) {
  let (sender, mut receiver) = mpsc::unbounded_channel();
  let engine = Engine::new(cloud).with_notifier(Arc::new(ChannelNotifier::new(sender)));
  let printer = tokio::spawn(async move {
    while let Some(event) = receiver.recv().await {
      print_event(&event);
    }
  });
  (engine, printer)
}

fn print_event(event: &DeploymentEvent) {
  match event {
    DeploymentEvent::ResourceStarted {
      logical_id, action, ..
    } => eprintln!("  {} {}...", action, logical_id),
    DeploymentEvent::ResourceCompleted {
      logical_id,
      physical_id,
      ..
    } => eprintln!("  done {} ({})", logical_id, physical_id),
    DeploymentEvent::ResourceFailed {
      logical_id, error, ..
    } => eprintln!("  FAILED {}: {}", logical_id, error),
    DeploymentEvent::ResourceRetained {
      logical_id,
      physical_id,
      ..
    } => eprintln!("  retained {} ({})", logical_id, physical_id),
    DeploymentEvent::RollbackStarted { .. } => eprintln!("Rolling back..."),
    DeploymentEvent::ResourceRolledBack { logical_id, .. } => {
      eprintln!("  rolled back {}", logical_id)
    }
    _ => {}
  }
}

async fn deploy(ctx: &Workspace) -> Result<()> {
  let (stack_name, template) = synthesize(&ctx.config)?;

  let violations = validate(&template);
  if !violations.is_empty() {
    for violation in &violations {
      eprintln!("  - {}", violation);
    }
    bail!("refusing to deploy {}: {} policy violation(s)", stack_name, violations.len());
  }

  let previous = load_deployment(ctx, &stack_name).await?;
  let cloud = Arc::new(load_cloud(ctx).await?);

  eprintln!("Deploying {}", stack_name);
  let (engine, printer) = engine_with_progress(cloud.clone());
  let result = engine
    .apply(&stack_name, &template, previous.as_ref(), cancel_on_interrupt())
    .await;
  drop(engine);
  let _ = printer.await;

  // Rolled-back or not, the cloud changed.
  save_cloud(ctx, &cloud).await?;
  let report = result.with_context(|| format!("failed to deploy {}", stack_name))?;

  ctx
    .store
    .save(&report.deployment)
    .await
    .with_context(|| format!("failed to save state for {}", stack_name))?;

  if report.is_noop() {
    eprintln!("No changes.");
  } else {
    eprintln!(
      "Applied {} change(s), retained {}.",
      report.changes.len(),
      report.retained.len()
    );
  }
  println!("{}", serde_json::to_string_pretty(&report.deployment.outputs)?);
  Ok(())
}

async fn destroy(ctx: &Workspace) -> Result<()> {
  let (stack_name, _) = synthesize(&ctx.config)?;
  let Some(mut deployment) = load_deployment(ctx, &stack_name).await? else {
    eprintln!("Stack {} is not deployed.", stack_name);
    return Ok(());
  };
  let cloud = Arc::new(load_cloud(ctx).await?);

  eprintln!("Destroying {}", stack_name);
  let (engine, printer) = engine_with_progress(cloud.clone());
  let result = engine.destroy(&mut deployment, cancel_on_interrupt()).await;
  drop(engine);
  let _ = printer.await;

  save_cloud(ctx, &cloud).await?;
  match result {
    Ok(report) => {
      ctx
        .store
        .remove(&stack_name)
        .await
        .with_context(|| format!("failed to remove state for {}", stack_name))?;
      eprintln!(
        "Deleted {} resource(s), retained {}.",
        report.deleted.len(),
        report.retained.len()
      );
      Ok(())
    }
    Err(e) => {
      // Keep whatever is still standing so a retry can finish the job.
      ctx
        .store
        .save(&deployment)
        .await
        .with_context(|| format!("failed to save state for {}", stack_name))?;
      Err(e).with_context(|| format!("failed to destroy {}", stack_name))
    }
  }
}

async fn outputs(ctx: &Workspace) -> Result<()> {
  let deployment = require_deployment(ctx).await?;
  println!("{}", serde_json::to_string_pretty(&deployment.outputs)?);
  Ok(())
}

async fn publish_dir(ctx: &Workspace, dir: &Path) -> Result<()> {
  let deployment = require_deployment(ctx).await?;
  let target = PublishTarget {
    bucket: require_output(&deployment, OUTPUT_BUCKET_NAME)?,
    distribution_id: require_output(&deployment, OUTPUT_DISTRIBUTION_ID)?,
    deploy_user: require_output(&deployment, OUTPUT_DEPLOY_USER_NAME)?,
  };
  let cloud = load_cloud(ctx).await?;

  let report = publish(&cloud, &target, dir).await;
  save_cloud(ctx, &cloud).await?;
  let report = report?;

  eprintln!(
    "Uploaded {} file(s), deleted {}, invalidation {}.",
    report.uploaded.len(),
    report.deleted.len(),
    report.invalidation_id
  );
  Ok(())
}

async fn fetch(ctx: &Workspace, path: &str, http: bool) -> Result<()> {
  let deployment = require_deployment(ctx).await?;
  let domain = require_output(&deployment, OUTPUT_DISTRIBUTION_DOMAIN_NAME)?;
  let cloud = load_cloud(ctx).await?;

  let scheme = if http { Scheme::Http } else { Scheme::Https };
  let response = cloud
    .request(domain, scheme, path)
    .await
    .with_context(|| format!("failed to fetch {}{}", domain, path))?;

  eprintln!("HTTP {}", response.status);
  if let Some(location) = &response.location {
    eprintln!("Location: {}", location);
  }
  if let Some(content_type) = &response.content_type {
    eprintln!("Content-Type: {}", content_type);
  }
  print!("{}", response.text());
  Ok(())
}
