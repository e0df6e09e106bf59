use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchyard::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Serves Messages API clients from chat-completion backends", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve,

    /// Load and validate the config, then print the routing table
    #[command(name = "check-config")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        eprintln!("Config file not found: {}", config_path.display());
        eprintln!("Please create a config file or use --config to specify one.");
        eprintln!("See config/default.yaml for an example.");
        std::process::exit(1);
    };

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format)?;

    tracing::info!("Config loaded from: {}", config_path.display());

    match cli.command {
        Some(Commands::Serve) | None => {
            switchyard::run(config).await?;
        }
        Some(Commands::CheckConfig) => {
            print_routes(&config);
        }
    }

    Ok(())
}

fn print_routes(config: &Config) {
    println!("✅ Config is valid");
    println!("Listen:   {}", config.bind_addr());
    for provider in &config.providers {
        println!("Provider: {} -> {} [{}]", provider.name, provider.api_base_url, provider.models.join(", "));
    }

    let router = &config.router;
    let show = |target: &Option<String>| target.clone().unwrap_or_else(|| "(unset)".to_string());
    println!("Route default:     {}", show(&router.default));
    println!("Route background:  {}", show(&router.background));
    println!("Route think:       {}", show(&router.think));
    println!(
        "Route longContext: {} (> {} tokens)",
        show(&router.long_context),
        router.long_context_threshold
    );
    println!(
        "Agents:            {}",
        if config.agents.enabled { "enabled" } else { "disabled" }
    );
    if !config.middleware.is_empty() {
        println!("Middleware:        {}", config.middleware.join(" -> "));
    }
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        _ => {
            // Default to pretty
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
