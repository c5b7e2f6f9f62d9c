//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the
//! appropriate commands.

pub mod model_list;
pub mod persona_list;
pub mod provider_list;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::model_list::list_models;
use crate::cli::persona_list::list_personas;
use crate::cli::provider_list::list_providers;
use crate::core::config::Config;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "A multi-provider chat front end for LLM APIs")]
#[command(
    long_about = "Parley talks to IONOS, OpenAI-compatible, Anthropic, Google, and local \
Ollama endpoints through a single configuration file. Providers, models, and \
personas are declared in TOML; API keys are read from the environment.\n\n\
Credentials:\n\
  Each provider reads its key from <PROVIDER_ID>_API_KEY (uppercased, with\n\
  dashes replaced by underscores), or from the credential_env variable named\n\
  in its configuration entry. Ollama needs no credential.\n\n\
Logging:\n\
  Set RUST_LOG (e.g. RUST_LOG=parley=debug) to control diagnostic output\n\
  on stderr."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file (defaults to the platform config dir)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured providers and their credential status
    Providers,
    /// List configured models for a provider
    Models {
        /// Provider to list models for (defaults to the first configured)
        provider: Option<String>,
    },
    /// List configured personas
    Personas,
    /// Send a single prompt and print the reply
    Say {
        /// Prompt text
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Provider to use (defaults to the first configured)
        #[arg(short, long)]
        provider: Option<String>,
        /// Model to use (defaults to the provider's first model)
        #[arg(short, long)]
        model: Option<String>,
        /// Persona whose system prompt frames the conversation
        #[arg(long)]
        persona: Option<String>,
        /// Attach a file or directory of files (repeatable)
        #[arg(short = 'f', long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Providers => list_providers(&config),
        Commands::Models { provider } => list_models(&config, provider.as_deref()),
        Commands::Personas => list_personas(&config),
        Commands::Say {
            prompt,
            provider,
            model,
            persona,
            files,
        } => say::run_say(config, prompt, provider, model, persona, files).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config, Box<dyn Error>> {
    if let Some(path) = path {
        return Ok(Config::load(path)?);
    }
    match Config::default_path() {
        Some(default) if default.exists() => Ok(Config::load(&default)?),
        _ => Ok(Config::default()),
    }
}
