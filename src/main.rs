use a3s_traffic::config::{GovernanceConfig, Picker};
use a3s_traffic::lb::StaticDiscovery;
use a3s_traffic::provider::FileSource;
use a3s_traffic::{Governor, Invocation, SourceInfo};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// A3S Traffic — client-side routing and load balancing governance
#[derive(Parser)]
#[command(name = "a3s-traffic", version, about)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file (.yaml)
        #[arg(short, long, default_value = "traffic.yaml")]
        config: String,
    },
    /// Print the route rule table as JSON
    Dump {
        /// Path to configuration file (.yaml)
        #[arg(short, long, default_value = "traffic.yaml")]
        config: String,
    },
    /// Show which version and app a call would be routed to
    Route {
        /// Path to configuration file (.yaml)
        #[arg(short, long, default_value = "traffic.yaml")]
        config: String,
        /// Destination service
        #[arg(short, long)]
        service: String,
        /// Calling service (defaults to the configured local service)
        #[arg(long)]
        source: Option<String>,
        /// Request header as key=value, repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        /// Transport protocol
        #[arg(long, default_value = "rest")]
        protocol: String,
        /// Override the configured picker (weightPool, fitRate)
        #[arg(long)]
        picker: Option<Picker>,
    },
    /// Load the configuration and follow a governance file until Ctrl+C
    Watch {
        /// Path to configuration file (.yaml)
        #[arg(short, long, default_value = "traffic.yaml")]
        config: String,
        /// YAML file of governance keys to hot reload
        #[arg(short, long)]
        governance: Option<String>,
    },
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> a3s_traffic::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { config } => validate_config(&config).await,
        Commands::Dump { config } => dump_rules(&config).await,
        Commands::Route {
            config,
            service,
            source,
            headers,
            protocol,
            picker,
        } => route_call(&config, service, source, headers, protocol, picker).await,
        Commands::Watch { config, governance } => watch(&config, governance.as_deref()).await,
    }
}

async fn load(path: &str) -> a3s_traffic::Result<GovernanceConfig> {
    let config = GovernanceConfig::from_file(path).await?;
    config.validate()?;
    Ok(config)
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> a3s_traffic::Result<()> {
    if !std::path::Path::new(path).exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    let config = match GovernanceConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Picker:      {:?}", config.router.picker);
    println!(
        "  Strategy:    {} (filters: [{}])",
        config.load_balancer.strategy,
        config.load_balancer.filters.join(", ")
    );
    println!("  Route rules: {}", config.route_rule.len());
    let mut services: Vec<_> = config.route_rule.iter().collect();
    services.sort_by(|a, b| a.0.cmp(b.0));
    for (service, rules) in services {
        println!("    - {} ({} rules)", service, rules.len());
    }
    println!("  Templates:   {}", config.source_template.len());
    Ok(())
}

/// Print the seeded rule table
async fn dump_rules(path: &str) -> a3s_traffic::Result<()> {
    let config = load(path).await?;
    let governor = Governor::new(config, Arc::new(StaticDiscovery::new()))?;
    let routes = a3s_traffic::dashboard::routes_snapshot(&governor);
    println!("{}", serde_json::to_string_pretty(&routes)?);
    Ok(())
}

/// Route one call and print the decision
async fn route_call(
    path: &str,
    service: String,
    source: Option<String>,
    headers: Vec<(String, String)>,
    protocol: String,
    picker: Option<Picker>,
) -> a3s_traffic::Result<()> {
    let mut config = load(path).await?;
    if let Some(picker) = picker {
        config.router.picker = picker;
    }
    let governor = Governor::new(config, Arc::new(StaticDiscovery::new()))?;

    let headers: HashMap<String, String> = headers.into_iter().collect();
    let mut invocation = Invocation::new(service, protocol);
    match source {
        Some(name) => {
            let caller = SourceInfo::new(name);
            governor.route_from(&headers, Some(&caller), &mut invocation)?
        }
        None => governor.route(&headers, &mut invocation)?,
    }

    let decision = serde_json::json!({
        "service": invocation.microservice_name,
        "version": invocation.version_or_latest(),
        "app": invocation.app_or_default(),
        "routeTags": invocation.route_tags,
    });
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Run the governor and follow governance keys until Ctrl+C
async fn watch(path: &str, governance: Option<&str>) -> a3s_traffic::Result<()> {
    tracing::info!("A3S Traffic v{}", env!("CARGO_PKG_VERSION"));
    let config = load(path).await?;
    let governor = Governor::new(config, Arc::new(StaticDiscovery::new()))?;
    governor.start().await?;

    if let Some(file) = governance {
        governor.add_source(Arc::new(FileSource::new(file)?))?;
        tracing::info!(file, "Hot reload enabled");
    }
    tracing::info!(services = governor.store().len(), "Governor ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    governor.shutdown().await;
    Ok(())
}
