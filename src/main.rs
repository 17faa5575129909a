// SPDX-License-Identifier: MIT OR Apache-2.0

//! jobmatch - Match resumes to job postings
//!
//! Chunks job descriptions at sentence boundaries, embeds them into a
//! length-weighted vector per posting, and ranks postings against a resume.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands, OutputFormat};
use jobmatch::config::{Config, ConfigOutputFormat};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Initialize tracing with JOBMATCH_LOG env var (e.g., JOBMATCH_LOG=debug jobmatch trans --mode all)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("JOBMATCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "jobmatch", &mut std::io::stdout());
        return Ok(());
    }

    let data_root = match cli.data_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let mut config = Config::load(&data_root);
    config.apply_env_overrides()?;

    let format = cli.format.unwrap_or(match config.output_format() {
        Some(ConfigOutputFormat::Json) => OutputFormat::Json,
        _ => OutputFormat::Text,
    });
    let env = commands::Env {
        data_root,
        config,
        format,
        compact: cli.compact,
    };

    match cli.command {
        Commands::Chunk { file, max_size } => {
            commands::chunk_text(&env, file.as_deref(), max_size)?;
        }
        Commands::LoadCsv { file, table } => {
            commands::load_csv(&env, &file, table.as_deref())?;
        }
        Commands::UploadEvent { bucket, name, size } => {
            commands::upload_event(&env, &bucket, &name, size.as_deref())?;
        }
        Commands::Trans { mode } => {
            commands::trans(&env, &mode)?;
        }
        Commands::Match { text, file, top_k } => {
            commands::match_resume(&env, text.as_deref(), file.as_deref(), top_k)?;
        }
        Commands::Webhook { file } => {
            commands::webhook(&env, file.as_deref())?;
        }
        Commands::Serve { bind } => {
            commands::serve(&env, bind.as_deref())?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
