use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::ByteRange;

#[derive(Parser, Debug)]
#[command(
    name = "mesio-cache",
    about = "Inspect and maintain mesio resource cache directories",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Cache directory
    #[arg(short, long, global = true, env = "MESIO_CACHE_DIR")]
    pub dir: Option<PathBuf>,

    /// Prefix of cache file names
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the total size of the cache
    Size,

    /// List cached data files
    List,

    /// Delete every cache file in the directory
    Sweep,

    /// Show what the cache knows about a URL
    Inspect {
        /// URL of the resource
        url: String,

        /// Byte range, as start-end
        #[arg(short, long)]
        range: Option<ByteRange>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store a local file as the cached body of a URL
    Import {
        /// URL of the resource
        url: String,

        /// File holding the body
        file: PathBuf,

        /// Byte range, as start-end
        #[arg(short, long)]
        range: Option<ByteRange>,

        /// MIME type
        #[arg(long)]
        mime: Option<String>,

        /// ETag announced by the server
        #[arg(long)]
        etag: Option<String>,

        /// Last-Modified date announced by the server
        #[arg(long)]
        last_modified: Option<String>,
    },

    /// Write cached bytes to stdout
    Cat {
        /// URL of the resource
        url: String,

        /// Byte range, as start-end
        #[arg(short, long)]
        range: Option<ByteRange>,

        /// Start offset within the cached bytes
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Stream the bytes even if the entry is corrupted
        #[arg(short, long)]
        force: bool,
    },
}
