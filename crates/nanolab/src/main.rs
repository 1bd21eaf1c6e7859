// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Nanolab - operator CLI for the image generation core.
//!
//! Inspects and resets the trial quota ledger, estimates costs, probes the
//! generation API and runs one-off generations from the terminal.

mod doctor;
mod generate;
mod quota;
mod runtime;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use nanolab_config::NanolabConfig;
use nanolab_core::{GenerationMode, SafetyLevel};

/// Nanolab - image generation orchestration and trial quota.
#[derive(Parser, Debug)]
#[command(name = "nanolab", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect or reset the trial quota.
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },
    /// Estimate the cost of a generation.
    Cost {
        #[arg(long, default_value = "1K")]
        resolution: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Check configuration, quota storage and API health.
    Doctor,
    /// Generate an image and write it to disk.
    Generate(GenerateArgs),
}

#[derive(Subcommand, Debug)]
enum QuotaAction {
    /// Show today's usage per bucket.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Ask whether a generation would be allowed, without consuming.
    Check {
        #[arg(long, default_value = "basic")]
        mode: String,
        #[arg(long, default_value = "1K")]
        resolution: String,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Clear today's usage.
    Reset,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Text prompt.
    #[arg(long, short)]
    prompt: String,

    /// Billing mode (basic, chat, template...). Ignored for blend and search.
    #[arg(long, default_value = "basic")]
    mode: GenerationMode,

    /// 1K, 2K or 4K.
    #[arg(long, default_value = "1K")]
    resolution: String,

    /// Aspect ratio; defaults to `gemini.default_aspect_ratio`.
    #[arg(long)]
    aspect_ratio: Option<String>,

    /// Safety filtering level; defaults to `gemini.safety_level`.
    #[arg(long)]
    safety: Option<SafetyLevel>,

    /// Ask the model to include its reasoning.
    #[arg(long)]
    thinking: bool,

    /// Ground the image in Google Search results.
    #[arg(long, conflicts_with = "image")]
    search: bool,

    /// Source image to blend; repeat for several.
    #[arg(long)]
    image: Vec<PathBuf>,

    /// Number of images; more than one runs a batch.
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Run batch items concurrently.
    #[arg(long)]
    parallel: bool,

    /// API key for this run. Without one the configured key is used.
    #[arg(long)]
    api_key: Option<String>,

    /// Output file. Batches get `-<n>` appended before the extension.
    #[arg(long, short)]
    out: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(errors) => {
            nanolab_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.app.log_level);

    let outcome = match cli.command {
        Commands::Quota { action } => match action {
            QuotaAction::Status { json } => quota::run_status(&config, json, cli.plain).await,
            QuotaAction::Check {
                mode,
                resolution,
                count,
            } => quota::run_check(&config, &mode, &resolution, count).await,
            QuotaAction::Reset => quota::run_reset(&config).await,
        },
        Commands::Cost { resolution, count } => {
            quota::run_cost(&resolution, count);
            Ok(())
        }
        Commands::Doctor => doctor::run_doctor(&config, cli.plain).await,
        Commands::Generate(args) => generate::run_generate(&config, args).await,
    };

    if let Err(e) = outcome {
        eprintln!("nanolab: {e}");
        std::process::exit(1);
    }
}

fn load_config(
    path: Option<&std::path::Path>,
) -> Result<NanolabConfig, Vec<nanolab_config::ConfigError>> {
    match path {
        Some(path) => nanolab_config::load_and_validate_path(path),
        None => nanolab_config::load_and_validate(),
    }
}

/// Initialize the tracing subscriber with an env filter. `RUST_LOG` wins
/// over the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nanolab={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
