// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// jobmatch - Match resumes to job postings
///
/// Loads job postings from CSV, chunks and embeds their descriptions, and
/// finds the postings closest to a resume. Also serves the ingest, trans and
/// webhook handlers over HTTP.
#[derive(Parser, Debug)]
#[command(name = "jobmatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the warehouse, index and drive (defaults to current directory)
    #[arg(long, global = true, env = "JOBMATCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true)]
    pub format: Option<OutputFormat>,

    /// Compact JSON output (no pretty formatting)
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split text into sentence-aligned chunks
    Chunk {
        /// File to read (defaults to stdin)
        file: Option<PathBuf>,

        /// Maximum chunk size in characters (defaults to the configured chunk size)
        #[arg(short, long)]
        max_size: Option<usize>,
    },

    /// Load a CSV file into a warehouse table
    #[command(name = "load-csv")]
    LoadCsv {
        /// CSV file with a header row
        file: PathBuf,

        /// Target table (defaults to the configured source table)
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Process an object upload notification
    #[command(name = "upload-event")]
    UploadEvent {
        /// Bucket directory under the drive root
        #[arg(long)]
        bucket: String,

        /// Object name, `<table>/<file>.csv`
        #[arg(long)]
        name: String,

        /// Object size in bytes (defaults to the stored object's size)
        #[arg(long)]
        size: Option<String>,
    },

    /// Run the chunk and index jobs
    Trans {
        /// Stage to run: embedding, datastore or all
        #[arg(long)]
        mode: String,
    },

    /// Find the postings closest to a resume
    #[command(alias = "m")]
    Match {
        /// Resume text
        #[arg(required_unless_present = "file")]
        text: Option<String>,

        /// Read the resume from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Number of matches (defaults to the configured top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Answer one webhook request read as JSON
    Webhook {
        /// Request file (defaults to stdin)
        file: Option<PathBuf>,
    },

    /// Serve the HTTP front end
    Serve {
        /// Address to bind (host:port)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
