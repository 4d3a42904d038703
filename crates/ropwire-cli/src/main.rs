//! ropwire CLI
//!
//! Decode multiplexed ROP buffers and exercise the in-memory server.

mod config;
mod decode;
mod demo;
mod progress;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use console::{Term, style};
use tracing_subscriber::EnvFilter;

use config::Config;
use demo::Scenario;

/// ropwire - Remote Operations buffer tools
#[derive(Parser)]
#[command(name = "ropwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a hex-encoded ROP buffer
    Decode {
        /// Buffer bytes as hex, including the RPC_HEADER_EXT
        #[arg(required = true)]
        hex: String,

        /// Treat the buffer as a request instead of a response
        #[arg(long)]
        request: bool,

        /// Number of responses the request carried
        #[arg(long)]
        count: Option<usize>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run scenarios against the in-memory server
    Demo {
        /// Scenarios to run; all when omitted
        #[arg(value_enum)]
        scenarios: Vec<Scenario>,

        /// Print JSON reports instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the default path
        #[arg(long)]
        init: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    config.validate()?;

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Decode {
            hex,
            request,
            count,
            json,
        } => decode_buffer(&hex, request, count, json),
        Commands::Demo { scenarios, json } => run_demo(&config, scenarios, json),
        Commands::Config { init } => show_config(&config, init),
    }
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.logging.file {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Decode and print one buffer
fn decode_buffer(hex: &str, request: bool, count: Option<usize>, json: bool) -> anyhow::Result<()> {
    let bytes = decode::parse_hex(hex)?;
    tracing::debug!("Decoding {} byte buffer", bytes.len());

    if request {
        let dump = decode::decode_request(&bytes)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        } else {
            decode::print_request(&dump);
        }
    } else {
        let dump = decode::decode_response(&bytes, count)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        } else {
            decode::print_response(&dump);
        }
    }

    Ok(())
}

/// Run the selected scenarios and print what the server returned
fn run_demo(config: &Config, scenarios: Vec<Scenario>, json: bool) -> anyhow::Result<()> {
    let scenarios = if scenarios.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        scenarios
    };
    let client = config.client.to_client_config();
    let show_progress = !json && Term::stdout().is_term();

    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        reports.push(demo::run(scenario, &config.server, &client, show_progress)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", style(report.title).bold());
            for step in &report.steps {
                let observed = if step.observed == step.expected {
                    style(step.observed.to_string()).green()
                } else {
                    style(step.observed.to_string()).red()
                };
                println!("  {:<48} {}", step.label, observed);
                if step.observed != step.expected {
                    println!("  {:<48} expected {}", "", step.expected);
                }
            }
            for (label, ok) in &report.checks {
                let mark = if *ok { style("ok").green() } else { style("FAILED").red() };
                println!("  {label:<48} {mark}");
            }
            println!();
        }
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} scenario(s) did not behave as expected");
    }
    Ok(())
}

/// Print the effective configuration, optionally saving it
fn show_config(config: &Config, init: bool) -> anyhow::Result<()> {
    let path = Config::default_path();
    if init {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        config.save(&path)?;
        println!("Wrote {}", path.display());
    }

    println!("ropwire {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Client:");
    println!(
        "  Max request: {}",
        progress::format_bytes(config.client.max_request_size as u64)
    );
    println!(
        "  Max response: {}",
        progress::format_bytes(config.client.max_response_size as u64)
    );
    println!(
        "  Backoff: {} retries, cap {} ms",
        config.client.max_backoff_retries, config.client.backoff_cap_ms
    );
    println!("  Obfuscate: {}", config.client.obfuscate);
    println!();
    println!("Server:");
    println!("  Handle slots: {}", config.server.max_handle_slots);
    println!("  Open objects: {}", config.server.max_open_objects);
    println!(
        "  FastTransfer chunk: {}",
        progress::format_bytes(config.server.fast_transfer_chunk as u64)
    );
    println!("  Busy exchanges: {}", config.server.busy_exchanges);
    println!();
    println!("Logging: {}", config.logging.level);

    Ok(())
}
