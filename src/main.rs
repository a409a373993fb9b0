//! `config-sync`: inspection and demo CLI for the config-sync client.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use config_sync::cache::FileCache;
use config_sync::flatten::{parse_flat, Format};
use config_sync::observability::logging;
use config_sync::transport::memory::MemoryConfigServer;
use config_sync::transport::{CallMetadata, PublishConfigRequest, StaticCredentials};
use config_sync::{ClientConfig, ConfigClient, ConfigRecord, ListenParams, SubscriptionKey};

#[derive(Parser)]
#[command(name = "config-sync")]
#[command(about = "Inspect config-sync data and run an in-process demo", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the flattened key/value view of a config file as JSON
    Flatten {
        #[arg(short, long)]
        format: Format,
        file: PathBuf,
    },
    /// Print a cached record
    Cache {
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        group: String,
        #[arg(short, long)]
        name: String,
        /// Print the flattened key/value file instead of the raw record
        #[arg(long)]
        key_value: bool,
    },
    /// Fetch, listen and publish against an in-process config service
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Commands::Flatten { format, file } => {
            let body = std::fs::read_to_string(&file)?;
            let flat = parse_flat(&body, Some(format))?;
            println!("{}", serde_json::to_string_pretty(&flat)?);
        }
        Commands::Cache {
            dir,
            group,
            name,
            key_value,
        } => {
            let cache = FileCache::new(dir);
            let key = SubscriptionKey::new(group, name);
            let json = if key_value {
                serde_json::to_string_pretty(&cache.read_key_value(&key)?)?
            } else {
                serde_json::to_string_pretty(&cache.read_fallback(&key)?)?
            };
            println!("{}", json);
        }
        Commands::Demo => run_demo().await?,
    }

    Ok(())
}

async fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    let key = SubscriptionKey::new("demo", "app");
    let server = MemoryConfigServer::new();
    server.set_config(
        key.clone(),
        ConfigRecord {
            private: "database:\n  host: db.local\n  port: 5432\n".to_string(),
            version: "1".to_string(),
            format: Some(Format::Yaml),
            public: r#"{"region":"eu-west"}"#.to_string(),
            public_version: "1".to_string(),
            public_format: Some(Format::Json),
            services: r#"{"billing":{"primary":{"internalAddress":"10.0.0.7","port":80,"targetPort":8080}}}"#
                .to_string(),
        },
    );

    let mut config = ClientConfig::default();
    config.server.address = "memory.local:7001".to_string();
    config.cache.path = std::env::temp_dir()
        .join("config-sync-demo")
        .to_string_lossy()
        .into_owned();
    config.listen.interval_ms = 1_000;
    config.environment.mirror_on_change = false;

    let mut metadata = CallMetadata::new();
    metadata.insert("backendName".to_string(), "demo".to_string());
    metadata.insert("token".to_string(), "demo-token".to_string());
    let client = ConfigClient::connect_with(
        config,
        Arc::new(server.transport()),
        Arc::new(StaticCredentials(metadata)),
    )
    .await?;

    let view = client.get_key_value_config("demo", "app").await?;
    println!("fetched: {}", serde_json::to_string_pretty(&view)?);
    let billing = client.get_service_address("demo", "app", "billing").await?;
    println!("billing instances: {}", billing.len());

    let handle = client.listen_config(ListenParams::new("demo", "app").on_change(|event| {
        println!("change: [{}] {} = {:?}", event.section, event.key, event.value);
    }))?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    client
        .publish_config(PublishConfigRequest {
            group: "demo".to_string(),
            name: "app".to_string(),
            body: "database:\n  host: db.internal\n".to_string(),
            tag_name: "demo".to_string(),
            format: Some(Format::Yaml),
            description: "move database".to_string(),
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let workers = handle.probe().live_workers();
    client.close().await;
    println!("closed session with {} live workers", workers);
    Ok(())
}
