//! Store Provisioner
//!
//! Runs the store provisioning API, or performs one lifecycle operation
//! from the command line against the same directory and cluster.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use store_provisioner::catalog::{hostname_for, StoreCredentials, DEFAULT_SAMPLE_PRODUCTS};
use store_provisioner::controlplane::{generate_password, generate_store_id};
use store_provisioner::domain::ports::{ClusterProviderRef, StoreDirectory};
use store_provisioner::{
    seed_default_owners, ApiServer, ApiServerConfig, CatalogConfig, CreateStoreRequest,
    InMemoryCluster, JsonStoreDirectory, KubeCluster, Orchestrator, OrchestratorConfig,
    ProvisioningMetrics, StoreSpec, StoreTopology,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Store Provisioner - isolated WooCommerce stores on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000", global = true)]
    api_addr: String,

    /// Store directory file
    #[arg(long, env = "DIRECTORY_PATH", default_value = "store_directory.json", global = true)]
    directory_path: PathBuf,

    /// Default hostname suffix for new stores
    #[arg(long, env = "STORE_DOMAIN_SUFFIX", default_value = "local", global = true)]
    domain_suffix: String,

    /// Give up waiting for the database after this many seconds
    #[arg(long, env = "READINESS_TIMEOUT_SECS", default_value = "300", global = true)]
    readiness_timeout_secs: u64,

    /// Ingress class for store routes
    #[arg(long, env = "INGRESS_CLASS", default_value = "nginx", global = true)]
    ingress_class: String,

    /// Opaque credential stored on seeded owners
    #[arg(long, env = "OWNER_PASSWORD_HASH", default_value = "!", global = true)]
    owner_password_hash: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Run in standalone mode (in-memory cluster, no Kubernetes)
    #[arg(long, env = "STANDALONE", global = true)]
    standalone: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the REST API (default)
    Serve,
    /// Provision a store
    Create {
        #[arg(long)]
        owner_id: i64,
        #[arg(long)]
        name: Option<String>,
        /// Application storage in Gi
        #[arg(long)]
        storage_gi: Option<u32>,
        /// Hostname suffix for this store
        #[arg(long)]
        suffix: Option<String>,
        #[arg(long)]
        admin_password: Option<String>,
        /// File of `name|price|description` rows
        #[arg(long)]
        sample_products_file: Option<PathBuf>,
    },
    /// List stores
    List {
        #[arg(long)]
        owner_id: Option<i64>,
    },
    /// Delete a store
    Delete {
        store_id: String,
        #[arg(long)]
        owner_id: Option<i64>,
    },
    /// Print the manifests of a store without touching the cluster
    Render {
        #[arg(long)]
        store_id: Option<String>,
        #[arg(long, default_value = "2")]
        storage_gi: u32,
    },
    /// Create the default owner accounts if none exist
    SeedOwners,
    /// List owner accounts
    Owners,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let catalog = CatalogConfig {
        ingress_class: args.ingress_class.clone(),
        ..Default::default()
    };

    match args.command.as_ref().unwrap_or(&Command::Serve) {
        Command::Render {
            store_id,
            storage_gi,
        } => {
            let store_id = store_id.clone().unwrap_or_else(generate_store_id);
            let spec = StoreSpec {
                name: format!("store-{}", store_id),
                hostname: hostname_for(&store_id, &args.domain_suffix),
                credentials: StoreCredentials {
                    admin_user: "admin".to_string(),
                    admin_password: generate_password(),
                    admin_email: "admin@example.com".to_string(),
                    root_password: generate_password(),
                },
                sample_products: DEFAULT_SAMPLE_PRODUCTS.to_string(),
                storage_size_gi: *storage_gi,
                store_id,
            };
            print!("{}", StoreTopology::build(&spec, &catalog).render_yaml()?);
            return Ok(());
        }
        Command::SeedOwners => {
            let directory = JsonStoreDirectory::open(&args.directory_path).await?;
            let created = seed_default_owners(&directory, &args.owner_password_hash).await?;
            println!("{} owners created", created);
            return Ok(());
        }
        Command::Owners => {
            let directory = JsonStoreDirectory::open(&args.directory_path).await?;
            for owner in directory.list_owners().await? {
                let usage = directory.owner_usage(owner.id).await?;
                println!(
                    "{}\t{}\t{}/{} stores\t{}/{} Gi",
                    owner.id,
                    owner.username,
                    usage.store_count,
                    owner.max_stores,
                    usage.total_storage_gi,
                    owner.max_storage_gi
                );
            }
            return Ok(());
        }
        _ => {}
    }

    info!(
        version = store_provisioner::VERSION,
        directory = %args.directory_path.display(),
        standalone = args.standalone,
        "Starting store provisioner"
    );

    let directory = Arc::new(JsonStoreDirectory::open(&args.directory_path).await?);
    let cluster: ClusterProviderRef = if args.standalone {
        Arc::new(InMemoryCluster::new())
    } else {
        Arc::new(
            KubeCluster::try_default()
                .await
                .context("connecting to the Kubernetes API")?,
        )
    };

    let mut config = OrchestratorConfig {
        default_domain_suffix: args.domain_suffix.clone(),
        catalog,
        ..Default::default()
    };
    config.readiness.timeout = Duration::from_secs(args.readiness_timeout_secs);

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        cluster,
        directory.clone(),
        ProvisioningMetrics::new()?,
    ));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            seed_default_owners(directory.as_ref(), &args.owner_password_hash).await?;

            let rest_addr: SocketAddr = args
                .api_addr
                .parse()
                .with_context(|| format!("invalid API address {}", args.api_addr))?;
            let server = Arc::new(ApiServer::new(ApiServerConfig { rest_addr }, orchestrator));

            let signal = server.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received");
                    signal.shutdown();
                }
            });

            server.run().await?;
            info!("Shutdown complete");
        }
        Command::Create {
            owner_id,
            name,
            storage_gi,
            suffix,
            admin_password,
            sample_products_file,
        } => {
            let sample_products = match sample_products_file {
                Some(path) => Some(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => None,
            };
            let store = orchestrator
                .create_store(CreateStoreRequest {
                    owner_id,
                    name,
                    sample_products,
                    hostname_suffix: suffix,
                    admin_password,
                    storage_size_gi: storage_gi,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&store)?);
        }
        Command::List { owner_id } => {
            let stores = orchestrator.list_stores(owner_id).await?;
            println!("{}", serde_json::to_string_pretty(&stores)?);
        }
        Command::Delete { store_id, owner_id } => {
            orchestrator.delete_store(&store_id, owner_id).await?;
            println!("deleted {}", store_id);
        }
        Command::Render { .. } | Command::SeedOwners | Command::Owners => {}
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "kube=info", "tower=warn", "tower_http=info", "axum=info"]
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            EnvFilter::add_directive,
        );

    // Logs go to stderr so command output on stdout stays parseable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
