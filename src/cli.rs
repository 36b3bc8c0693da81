use clap::{Parser, Subcommand};

/// ots-store: inspect and administer stored one-time secrets
#[derive(Parser)]
#[command(name = "ots-store", version, about)]
pub struct Cli {
    /// Per-call deadline in seconds (overrides OTS_CALL_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve configuration and connect to the selected backend pairing
    Check,

    /// Print a secret's metadata as JSON (never its payload)
    Get {
        secret_id: String,
    },

    /// Overwrite the remaining view count
    SetViews {
        secret_id: String,
        /// Sanitised to 1..=9; anything else becomes 1
        count: String,
    },

    /// Take one view and print how many remain
    Consume {
        secret_id: String,
    },

    /// Delete a secret and its encrypted file
    Delete {
        secret_id: String,
    },
}
