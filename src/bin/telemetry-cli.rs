use std::path::PathBuf;

use clap::{Parser, Subcommand};

use identity_telemetry::config::load_config;
use identity_telemetry::observability::privacy::mask_email;
use identity_telemetry::observability::tracing::TraceContext;

#[derive(Parser)]
#[command(name = "telemetry-cli")]
#[command(about = "Management CLI for identity-service telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a telemetry config file
    CheckConfig { path: PathBuf },
    /// Print the masked form of an email address
    Mask { value: String },
    /// Parse a W3C traceparent header
    Traceparent { header: String },
    /// Fetch a Prometheus metrics endpoint
    Scrape {
        #[arg(short, long, default_value = "http://localhost:9090/metrics")]
        url: String,

        /// Take the scrape URL from this config file instead of `--url`
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only print lines containing this metric name
        #[arg(short, long)]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => match load_config(&path) {
            Ok(config) => {
                println!("{} is valid", path.display());
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Mask { value } => {
            println!("{}", mask_email(&value));
        }
        Commands::Traceparent { header } => {
            let ctx = TraceContext::from_traceparent(&header)?;
            let json = serde_json::json!({
                "trace_id": ctx.trace_id.to_string(),
                "span_id": ctx.span_id.to_string(),
                "sampled": ctx.sampled,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Commands::Scrape { url, config, filter } => {
            let url = match config {
                Some(path) => load_config(&path)?.metrics.scrape_url(),
                None => url,
            };
            let res = reqwest::get(&url).await?;
            let status = res.status();
            if !status.is_success() {
                eprintln!("Error: {} returned status {}", url, status);
                std::process::exit(1);
            }
            let body = res.text().await?;
            for line in body.lines() {
                if filter.as_deref().map_or(true, |f| line.contains(f)) {
                    println!("{}", line);
                }
            }
        }
    }

    Ok(())
}
