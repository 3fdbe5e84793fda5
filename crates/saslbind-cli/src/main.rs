//! Command-line probe for the runtime-loaded Cyrus SASL library.

use std::mem::size_of;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use saslbind_core::abi::{self, CALLBACK_IDS, PROPERTY_IDS, RESULT_CODES};
use saslbind_core::{LoaderConfig, Platform, SaslLibrary, Slot, default_candidates};
use serde::Serialize;

/// Exit status when the SASL library cannot be used on this host.
const EXIT_UNAVAILABLE: u8 = 2;

/// SaslBind - Probe the system Cyrus SASL library.
#[derive(Parser, Debug)]
#[command(name = "saslbind")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Try to load libsasl2 and bind every required symbol.
    Probe {
        /// Candidate library name or path, tried in the order given.
        #[arg(short, long = "candidate")]
        candidates: Vec<String>,
        /// TOML configuration file with a [sasl] table.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the default candidate names for this platform.
    Candidates,
    /// Show the mirrored ABI constants and structure sizes.
    Abi,
}

/// Outcome of a probe, as printed.
#[derive(Debug, Serialize)]
struct ProbeReport {
    state: String,
    candidates: Vec<String>,
    library: Option<String>,
    symbols: Vec<String>,
    error: Option<String>,
    detail: Option<String>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Probe {
            candidates,
            config,
            json,
        } => run_probe(candidates, config, json),
        Command::Candidates => {
            print_candidates();
            Ok(ExitCode::SUCCESS)
        }
        Command::Abi => {
            print_abi();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("SASLBIND_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "saslbind={0},saslbind_core={0},warn",
            default_level
        ))
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }
}

fn run_probe(candidates: Vec<String>, config: Option<PathBuf>, json: bool) -> Result<ExitCode> {
    let mut loader_config = match config {
        Some(path) => LoaderConfig::from_file(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => LoaderConfig::default(),
    }
    .with_env_overrides();

    if !candidates.is_empty() {
        loader_config.candidates = candidates;
    }

    let effective: Vec<String> = loader_config
        .candidates()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut sasl = SaslLibrary::from_config(loader_config);
    let (symbols, error) = match sasl.load_default() {
        Ok(table) => (
            Slot::ALL
                .iter()
                .map(|slot| format!("{} @ {:p}", slot.symbol_name(), table.address(*slot)))
                .collect(),
            None,
        ),
        Err(e) => (Vec::new(), Some(e)),
    };

    let report = ProbeReport {
        state: sasl.state().to_string(),
        candidates: effective,
        library: sasl.library_name().map(str::to_string),
        symbols,
        error: error.as_ref().map(|e| e.to_string()),
        detail: error
            .as_ref()
            .map(|_| sasl.last_error().to_string())
            .filter(|d| !d.is_empty()),
    };

    tracing::info!(
        state = %report.state,
        library = report.library.as_deref().unwrap_or("none"),
        "probe finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    sasl.close();

    match error {
        None => Ok(ExitCode::SUCCESS),
        Some(e) if e.is_unavailable() => Ok(ExitCode::from(EXIT_UNAVAILABLE)),
        Some(e) => Err(e.into()),
    }
}

fn print_report(report: &ProbeReport) {
    println!("Candidates: {}", report.candidates.join(", "));
    match &report.library {
        Some(library) => println!("Status: {} ({})", report.state, library),
        None => println!("Status: {} (SASL unavailable)", report.state),
    }
    for symbol in &report.symbols {
        println!("  {}", symbol);
    }
    if let Some(error) = &report.error {
        println!("Error: {}", error);
    }
    if let Some(detail) = &report.detail {
        println!("Detail: {}", detail);
    }
}

fn print_candidates() {
    println!("Platform: {}", Platform::current());
    for (i, name) in default_candidates().iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
}

fn print_abi() {
    println!("Result codes:");
    for (name, value) in RESULT_CODES {
        println!("  {:<22} {}", name, value);
    }

    println!("Callback ids:");
    for (name, value) in CALLBACK_IDS {
        println!("  {:<22} {:#06x}", name, value);
    }

    println!("Property ids:");
    for (name, value) in PROPERTY_IDS {
        println!("  {:<22} {}", name, value);
    }

    println!("Structures:");
    println!("  {:<22} {} bytes", "sasl_secret_t", size_of::<abi::Secret>());
    println!("  {:<22} {} bytes", "sasl_callback_t", size_of::<abi::Callback>());
    println!("  {:<22} {} bytes", "sasl_interact_t", size_of::<abi::Interact>());
}
