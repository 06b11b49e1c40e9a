mod cli;
mod commands;
mod config;
mod error;
mod utils;

use crate::{
    cli::{Args, Commands},
    commands::{CommandExecutor, Validators},
    config::AppConfig,
    error::Result,
};
use anyhow::Context;
use clap::Parser;
use mesio_cache::CacheDirectory;
use std::path::Path;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{self, writer::BoxMakeWriter, writer::MakeWriterExt},
    prelude::*,
};

fn main() {
    if let Err(e) = run() {
        error!(error = ?e, "Application failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so `cat` output stays clean
    init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    let app_config = AppConfig::load(args.config.as_deref())?;
    let cache_config = app_config.cache_config(args.dir, args.prefix);
    debug!("{cache_config}");

    let directory = CacheDirectory::new(cache_config).context("Failed to open cache directory")?;
    let executor = CommandExecutor::new(directory);
    let mut stdout = std::io::stdout().lock();

    match args.command {
        Commands::Size => executor.size(&mut stdout)?,
        Commands::List => executor.list(&mut stdout)?,
        Commands::Sweep => executor.sweep(&mut stdout)?,
        Commands::Inspect { url, range, json } => {
            executor.inspect(&url, range, json, &mut stdout)?
        }
        Commands::Import {
            url,
            file,
            range,
            mime,
            etag,
            last_modified,
        } => executor.import(
            &url,
            &file,
            range,
            Validators {
                mime,
                etag,
                last_modified,
            },
            &mut stdout,
        )?,
        Commands::Cat {
            url,
            range,
            offset,
            force,
        } => {
            executor.cat(&url, range, offset, force, &mut stdout)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(MakeWriterExt::and(std::io::stderr, file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_ansi(log_file.is_none())
                .with_writer(writer),
        )
        .with(filter)
        .init();

    Ok(())
}
