//! Mnemo CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default config to `~/.mnemo`
//! - `ingest`: Add fragments to the stored memory
//! - `compress`: Compress a JSON file of fragments
//! - `classify`: Show the value tier of a piece of text
//! - `allocate`: Pick spans from a JSON file for a token budget
//! - `consolidate`: Merge similar stored fragments
//! - `status`: Show pulse, store and breaker state

use clap::{Parser, Subcommand};
use mnemo_config::AppConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "mnemo",
    about = "Mnemo: memory core for conversational agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.mnemo/config.toml)
    #[arg(short, long, global = true, env = "MNEMO_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Add text fragments to the stored memory
    Ingest {
        /// Fragment contents; a single `-` reads one fragment per stdin line
        #[arg(required = true)]
        content: Vec<String>,
    },

    /// Compress a JSON array of fragments and print the result
    Compress {
        /// Path to the fragment file
        file: PathBuf,

        /// Grouping mode
        #[arg(short, long, value_enum, default_value_t = commands::compress::Mode::Semantic)]
        mode: commands::compress::Mode,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify the response value of some text
    Classify {
        /// The text to classify
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Allocate a token budget across spans from a JSON file
    Allocate {
        /// Path to a JSON array of spans
        file: PathBuf,

        /// Token budget
        #[arg(short, long)]
        budget: u64,

        /// Category weights, e.g. `error_epoch=0.5,recent_turn=0.3`
        #[arg(short, long)]
        mixture: Option<String>,

        /// Print the allocation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge similar fragments in the stored memory
    Consolidate {
        /// Similarity threshold (defaults to the configured one)
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Show system status
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::run(cli.config.as_deref(), force).await?,
        Commands::Ingest { content } => commands::ingest::run(&config, content).await?,
        Commands::Compress { file, mode, json } => {
            commands::compress::run(&file, mode, json).await?
        }
        Commands::Classify { text } => commands::classify::run(&text.join(" "))?,
        Commands::Allocate {
            file,
            budget,
            mixture,
            json,
        } => commands::allocate::run(&config, &file, budget, mixture.as_deref(), json).await?,
        Commands::Consolidate { threshold } => {
            commands::consolidate::run(&config, threshold).await?
        }
        Commands::Status { json } => commands::status::run(&config, json).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidate_accepts_threshold_only() {
        let cli = Cli::try_parse_from(["mnemo", "consolidate", "--threshold", "0.8"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Consolidate { threshold: Some(t) } if t == 0.8
        ));
        assert!(Cli::try_parse_from(["mnemo", "consolidate", "--key", "nightly"]).is_err());
    }
}
