// Ownership Compiler CLI
// Registry fixture + fund exports → command script on stdout (or --output)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ownership_compiler::{
    load_fund_file, CompileRequest, Compiler, CompilerConfig, FixtureRegistry, ThrottledSource,
};

#[derive(Parser)]
#[command(name = "ownership-compiler")]
#[command(about = "Compile ownership chains and fund structures into a loader script", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, assemble and emit a script for one start entity
    Compile(CompileArgs),
}

#[derive(Args)]
struct CompileArgs {
    /// Registry fixture (JSON)
    #[arg(long)]
    registry: PathBuf,

    /// Identifier the ownership walk starts from
    #[arg(long)]
    start: String,

    /// Fund export (.json) or share-class file (.csv); repeatable
    #[arg(long = "funds")]
    funds: Vec<PathBuf>,

    /// Compiler config (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the script here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write diagnostics as JSON
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    #[arg(long)]
    no_subsidiaries: bool,

    #[arg(long)]
    managed_funds: bool,

    /// Minimum delay between registry calls
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Stamp the script with the current UTC time
    #[arg(long)]
    timestamp: bool,
}

/// `RUST_LOG` directives when present and valid, `info` otherwise
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() -> Result<()> {
    // stderr keeps stdout clean for the script
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile(args) => run_compile(args),
    }
}

fn run_compile(args: CompileArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CompilerConfig::from_file(path)?,
        None => CompilerConfig::default(),
    };
    if args.no_subsidiaries {
        config.include_subsidiaries = false;
    }
    if args.managed_funds {
        config.include_managed_funds = true;
    }
    if let Some(delay) = args.delay_ms {
        config.fetch_delay_ms = delay;
    }
    config.validate().context("Invalid compiler configuration")?;

    let registry = FixtureRegistry::from_file(&args.registry)?;
    let mut source = ThrottledSource::new(registry, config.fetch_delay_ms);

    let mut request = CompileRequest::new(args.start.clone());
    for path in &args.funds {
        request = request.with_funds(load_fund_file(path)?);
    }
    if args.timestamp {
        request = request.with_timestamp(Utc::now());
    }

    let compiler = Compiler::new(config);
    let output = compiler
        .compile(&mut source, request)
        .with_context(|| format!("Failed to compile script for {}", args.start))?;

    let rendered = output.script.render();
    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write script: {}", path.display()))?;
            info!(path = %path.display(), commands = output.script.len(), "script written");
        }
        None => print!("{}", rendered),
    }

    if let Some(path) = &args.diagnostics {
        let json = serde_json::to_string_pretty(output.diagnostics.entries())
            .context("Failed to serialize diagnostics")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write diagnostics: {}", path.display()))?;
    }

    eprintln!(
        "✓ {} commands, {} diagnostics ({} warnings)",
        output.script.len(),
        output.diagnostics.len(),
        output.diagnostics.warning_count()
    );
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
