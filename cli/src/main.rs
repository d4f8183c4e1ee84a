mod state;

use bitbucket::prelude::*;
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bitbucket-provider")]
#[command(about = "Manage Bitbucket resources from declarative state files")]
struct Cli {
    /// API base URL (defaults to BITBUCKET_BASE_URL or https://api.bitbucket.org/)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Fail on unexpected HTTP statuses instead of ignoring them
    #[arg(long, global = true)]
    strict: bool,
    /// How to wait for a created resource to become readable
    #[arg(long, global = true, value_enum, default_value_t = Settle::Poll)]
    settle: Settle,
    /// Fixed wait after create, in milliseconds
    #[arg(long, global = true, default_value = "5000")]
    settle_delay_ms: u64,
    /// Poll deadline after create, in milliseconds
    #[arg(long, global = true, default_value = "10000")]
    deadline_ms: u64,
    /// Listing pages to follow when looking a resource up
    #[arg(long, global = true, default_value = "50")]
    max_pages: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Settle {
    Fixed,
    Poll,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered resource types
    Resources,
    /// Print resource schemas as JSON
    Schema {
        /// Only print this resource type
        #[arg(short, long)]
        resource: Option<String>,
    },
    /// Create the resource described by the state file
    Create(StateArgs),
    /// Refresh the state file from the remote resource
    Read(StateArgs),
    /// Push the state file's attributes to the remote resource
    Update(StateArgs),
    /// Delete the remote resource
    Delete(StateArgs),
}

#[derive(clap::Args)]
struct StateArgs {
    /// Resource type
    #[arg(short, long, default_value = DEPLOYMENT_VARIABLE_RESOURCE)]
    resource: String,
    /// JSON state file, rewritten after the operation
    #[arg(short, long)]
    state: PathBuf,
}

impl Cli {
    fn client_config(&self) -> BitbucketConfig {
        let config = BitbucketConfig::from_env();
        match &self.base_url {
            Some(base_url) => config.with_base_url(base_url.clone()),
            None => config,
        }
    }

    fn resource_config(&self) -> ResourceConfig {
        let consistency = match self.settle {
            Settle::Fixed => {
                ConsistencyConfig::fixed_delay(Duration::from_millis(self.settle_delay_ms))
            }
            Settle::Poll => ConsistencyConfig::poll(Duration::from_millis(self.deadline_ms)),
        };
        let policy = if self.strict {
            StatusPolicy::Strict
        } else {
            StatusPolicy::Lenient
        };

        ResourceConfig::default()
            .with_consistency(consistency)
            .with_status_policy(policy)
            .with_max_pages(self.max_pages)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let client = BitbucketClient::new(cli.client_config())?;
    let provider = Provider::bitbucket(Arc::new(client), cli.resource_config())?;

    match &cli.command {
        Commands::Resources => {
            for name in provider.resource_types() {
                println!("{}", name);
            }
        }
        Commands::Schema { resource } => {
            print_schema(&provider, resource.as_deref())?;
        }
        Commands::Create(args) => {
            run(&provider, Operation::Create, args, tokio::signal::ctrl_c()).await?
        }
        Commands::Read(args) => {
            run(&provider, Operation::Read, args, tokio::signal::ctrl_c()).await?
        }
        Commands::Update(args) => {
            run(&provider, Operation::Update, args, tokio::signal::ctrl_c()).await?
        }
        Commands::Delete(args) => {
            run(&provider, Operation::Delete, args, tokio::signal::ctrl_c()).await?
        }
    }

    Ok(())
}

fn print_schema(
    provider: &Provider,
    resource: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut schemas = provider.schemas();
    if let Some(name) = resource {
        schemas.retain(|key, _| key == name);
        if schemas.is_empty() {
            return Err(ProviderError::ResourceNotFound {
                name: name.to_string(),
            }
            .into());
        }
    }

    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}

/// Applies `operation` to the record in the state file, abandoning it when
/// `shutdown` completes first.
///
/// A failed or interrupted operation still rewrites the state file if the
/// record picked up a new identity, so a variable that was created remotely
/// is not orphaned.
async fn run<F>(
    provider: &Provider,
    operation: Operation,
    args: &StateArgs,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future,
{
    let loaded = state::load(&args.state)?;
    let mut data = loaded.clone();

    let outcome: Result<(), Box<dyn std::error::Error>> = tokio::select! {
        result = provider.apply(&args.resource, operation, &mut data) => result.map_err(Into::into),
        _ = shutdown => {
            warn!("Interrupted, {} of {} abandoned", operation, args.resource);
            Err(state::StateError::Interrupted.into())
        }
    };

    if let Err(err) = outcome {
        if identity_changed(&loaded, &data) {
            warn!(
                "{} {} failed after the remote changed, keeping id {:?}",
                args.resource,
                operation,
                data.id()
            );
            if let Err(save_err) = state::save(&args.state, &data) {
                error!("Could not record id {:?}: {}", data.id(), save_err);
            }
        }
        return Err(err);
    }

    if operation == Operation::Delete {
        data.set_id("");
    }

    if data.id().is_empty() && operation != Operation::Delete {
        warn!("{} no longer exists remotely", args.resource);
    }

    state::save(&args.state, &data)?;
    info!(
        "{} {} complete (id: {:?})",
        args.resource,
        operation,
        data.id()
    );
    Ok(())
}

fn identity_changed(before: &ResourceData, after: &ResourceData) -> bool {
    before.id() != after.id() || before.get("uuid") != after.get("uuid")
}
