use api_guard::config::{load_config, ConfigError, ResilienceConfig};
use api_guard::observability::{logging, metrics};
use api_guard::{GuardedClient, ResilienceCore, Shutdown};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Inspect and exercise the API resilience layer", long_about = None)]
struct Cli {
    /// Resilience config (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print the effective settings
    CheckConfig { path: PathBuf },
    /// Send GET requests through the resilience layer and print its stats
    Probe {
        url: String,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Rate limit window key
        #[arg(short, long, default_value = "global")]
        endpoint: String,

        /// Serve Prometheus metrics on this address while probing
        #[arg(long)]
        metrics_address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => match load_config(&path) {
            Ok(config) => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("Error: {} is invalid", path.display());
                for err in errors {
                    eprintln!("  - {}", err);
                }
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Probe {
            url,
            count,
            endpoint,
            metrics_address,
        } => {
            let config = match &cli.config {
                Some(path) => load_config(path)?,
                None => ResilienceConfig::default(),
            };
            logging::init_logging(&config.observability);

            let metrics_address = metrics_address.or_else(|| {
                config
                    .observability
                    .metrics_enabled
                    .then(|| config.observability.metrics_address.clone())
            });
            if let Some(addr) = metrics_address {
                match addr.parse() {
                    Ok(addr) => metrics::init_metrics(addr),
                    Err(_) => {
                        tracing::error!(metrics_address = %addr, "Failed to parse metrics address")
                    }
                }
            }

            let shutdown = Shutdown::new();
            let core = Arc::new(ResilienceCore::new(config));
            core.start(&shutdown);
            let client = GuardedClient::new(core.clone());

            for i in 0..count {
                match client.get("probe", &endpoint, &url).await {
                    Ok(response) => {
                        tracing::info!(
                            request = i + 1,
                            status = %response.status,
                            bytes = response.body.len(),
                            "Request succeeded"
                        );
                    }
                    Err(err) => {
                        eprintln!("{}", serde_json::to_string_pretty(&err.to_payload())?);
                    }
                }
            }

            println!("{}", serde_json::to_string_pretty(&core.stats())?);

            shutdown.trigger();
            core.shutdown();
        }
    }

    Ok(())
}
