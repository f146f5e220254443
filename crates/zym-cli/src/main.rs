//! Zym CLI - Command-line interface for the Zym scripting language

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "zym")]
#[command(version = zym_core::VERSION)]
#[command(about = "The Zym scripting language", long_about = None)]
struct Cli {
    /// Log filter, e.g. "debug" or "zym_core::gc=trace" (defaults to $ZYM_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Configuration file (defaults to zym.toml next to the source file)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tail-call mode: off, safe, smart or aggressive
    #[arg(long, global = true)]
    tco: Option<String>,

    /// Collect garbage on every allocation
    #[arg(long, global = true)]
    stress_gc: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Zym source file
    Run {
        /// Path to the entry module
        file: PathBuf,
    },

    /// Compile a program and report diagnostics without running it
    Check {
        /// Path to the entry module
        file: PathBuf,
    },

    /// Print the bytecode of a program
    Disasm {
        /// Path to the entry module
        file: PathBuf,

        /// Emit JSON instead of a text listing
        #[arg(long)]
        json: bool,
    },

    /// Compile a program to a bytecode file
    Build {
        /// Path to the entry module
        file: PathBuf,

        /// Output path (defaults to the source path with a .zymb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a compiled bytecode file
    Exec {
        /// Path to the bytecode file
        file: PathBuf,
    },
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_env("ZYM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let source_path = match &cli.command {
        Commands::Run { file }
        | Commands::Check { file }
        | Commands::Disasm { file, .. }
        | Commands::Build { file, .. }
        | Commands::Exec { file } => file.clone(),
    };
    let config = commands::load_config(
        cli.config.as_deref(),
        &source_path,
        cli.tco.as_deref(),
        cli.stress_gc,
    )?;

    match cli.command {
        Commands::Run { file } => commands::run_file(&file, &config)?,
        Commands::Check { file } => commands::check_file(&file, &config)?,
        Commands::Disasm { file, json } => commands::disasm_file(&file, &config, json)?,
        Commands::Build { file, output } => {
            let output = output.unwrap_or_else(|| file.with_extension("zymb"));
            commands::build_file(&file, &output, &config)?;
        }
        Commands::Exec { file } => commands::exec_file(&file, &config)?,
    }

    Ok(())
}
