//! cloud-init-rs - datasource discovery for cloud-init
//!
//! Finds the datasource of the current instance and prints what it
//! publishes.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloud_init_rs::config::{CONFIG_DIR, ConfigPaths, loader};
use cloud_init_rs::{Datasource, NetworkConfig, SourceContext, detect_datasource};

#[derive(Parser)]
#[command(name = "cloud-init-rs")]
#[command(author, version, about = "Datasource discovery for cloud-init", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory holding cloud.cfg and cloud.cfg.d
    #[arg(long, env = "CLOUD_INIT_CONFIG_DIR", default_value = CONFIG_DIR)]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the datasource of this instance and print its identity
    Discover,
    /// Query instance metadata
    Query {
        /// Key to query
        #[arg(value_enum)]
        key: QueryKey,
    },
    /// Publish the instance password to the metadata service
    PostPassword {
        password: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKey {
    InstanceId,
    LocalHostname,
    AvailabilityZone,
    PublicKeys,
    UserData,
    VendorData,
    NetworkConfig,
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    // RUST_LOG takes precedence over -v
    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).compact().finish())
        }
        Err(_) => {
            tracing::subscriber::set_global_default(builder.with_max_level(level).compact().finish())
        }
    };
    result.context("Failed to set tracing subscriber")
}

async fn query(source: &dyn Datasource, key: QueryKey) -> anyhow::Result<()> {
    match key {
        QueryKey::InstanceId => print_optional(source.instance_id().await?),
        QueryKey::LocalHostname => print_optional(source.host_name().await?),
        QueryKey::AvailabilityZone => print_optional(source.availability_zone().await?),
        QueryKey::PublicKeys => {
            for key in source.public_keys().await? {
                println!("{}", key);
            }
        }
        QueryKey::UserData => {
            print_optional(source.user_data().await?.map(|d| d.text().to_string()))
        }
        QueryKey::VendorData => {
            print_optional(source.vendor_data().await?.map(|d| d.text().to_string()))
        }
        QueryKey::NetworkConfig => match source.network_config().await? {
            Some(NetworkConfig::NetworkData(data)) => {
                println!("{}", serde_json::to_string_pretty(&data)?)
            }
            Some(NetworkConfig::Legacy(blob)) => print!("{}", blob),
            None => {}
        },
    }
    Ok(())
}

fn print_optional(value: Option<String>) {
    if let Some(value) = value {
        println!("{}", value);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let paths = ConfigPaths::with_dir(&cli.config_dir);
    let config = loader::load_system_config(&paths)
        .await
        .with_context(|| format!("Failed to load config from {}", cli.config_dir.display()))?;
    let source = detect_datasource(SourceContext::system(config)).await?;

    match cli.command {
        Commands::Discover => {
            let metadata = source.metadata().await?;
            println!("datasource: {}", source.name());
            if let Some(id) = metadata.instance_id {
                println!("instance-id: {}", id);
            }
            if let Some(hostname) = metadata.local_hostname {
                println!("local-hostname: {}", hostname);
            }
            if let Some(zone) = metadata.availability_zone {
                println!("availability-zone: {}", zone);
            }
        }
        Commands::Query { key } => query(source.as_ref(), key).await?,
        Commands::PostPassword { password } => {
            if !source.can_update_password() {
                anyhow::bail!("{} does not accept password updates", source.name());
            }
            if source.post_password(&password).await? {
                info!("Password posted");
            } else {
                info!("Password was already set");
            }
        }
    }

    Ok(())
}
