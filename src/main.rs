use clap::{Parser, Subcommand};
use snapvault_core::{CoreConfig, StorageBackendKind};
use snapvault_storage::create_backend;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "snapvault")]
#[command(about = "Photo upload and gallery service for networked cameras")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Server host address
        #[arg(long)]
        host: Option<String>,

        /// Server port (overrides PORT and the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Store photos in this directory with the local backend
        #[arg(long)]
        storage_dir: Option<PathBuf>,
    },
    /// List stored photos, newest first
    List,
    /// Delete a stored photo by name
    Delete {
        /// Photo name, e.g. photo_1700000000000.jpg
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), SnapvaultError> {
    let cli = Cli::parse();

    init_tracing(cli.debug);

    let config = CoreConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            storage_dir,
        } => {
            serve_command(config, host, port, storage_dir).await?;
        }
        Commands::List => {
            list_command(config).await?;
        }
        Commands::Delete { name } => {
            delete_command(config, name).await?;
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve_command(
    mut config: CoreConfig,
    host: Option<String>,
    port: Option<u16>,
    storage_dir: Option<PathBuf>,
) -> Result<(), SnapvaultError> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(dir) = storage_dir {
        config.storage.backend = StorageBackendKind::Local;
        config.storage.local.path = dir;
    }

    info!(
        "Starting snapvault on {}:{}",
        config.server.host, config.server.port
    );

    let server = snapvault_server::Server::new(config).await?;
    server.serve().await?;

    Ok(())
}

async fn list_command(config: CoreConfig) -> Result<(), SnapvaultError> {
    let storage = create_backend(&config.storage, &config.upload).await?;

    let mut images = storage.list().await?;
    images.retain(|image| snapvault_core::is_image_name(&image.name));
    images.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));

    if images.is_empty() {
        println!("No photos stored in {} storage", storage.kind());
        return Ok(());
    }

    println!("{:<40} {:>12} {:<20}", "Name", "Size", "Uploaded");
    println!("{}", "-".repeat(74));

    for image in &images {
        println!(
            "{:<40} {:>12} {:<20}",
            image.name,
            image.size_bytes,
            image.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!();
    println!("Total images: {}", images.len());
    Ok(())
}

async fn delete_command(config: CoreConfig, name: String) -> Result<(), SnapvaultError> {
    let storage = create_backend(&config.storage, &config.upload).await?;

    storage.delete(&name).await?;
    info!("Deleted {} from {} storage", name, storage.kind());
    println!("Deleted {}", name);

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SnapvaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] snapvault_core::CoreError),
    #[error("Storage error: {0}")]
    Storage(#[from] snapvault_storage::StorageError),
    #[error("Server error: {0}")]
    Server(#[from] snapvault_server::ServerError),
}
