//! One-shot "say" command: send a prompt, stream the reply to stdout.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::core::config::Config;
use crate::core::orchestrator::ChatOrchestrator;
use crate::providers::StreamEvent;

const SESSION_ID: &str = "cli";

pub async fn run_say(
    config: Config,
    prompt: Vec<String>,
    provider: Option<String>,
    model: Option<String>,
    persona: Option<String>,
    files: Vec<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.is_empty() {
        eprintln!("Usage: parley say <prompt>");
        std::process::exit(1);
    }

    let provider_id = match provider.or_else(|| config.providers.first().map(|p| p.id.clone())) {
        Some(id) => id,
        None => {
            eprintln!("❌ No providers configured. Add one to your configuration file.");
            std::process::exit(1);
        }
    };
    let model_id = match model.or_else(|| {
        config
            .find_provider(&provider_id)
            .and_then(|p| p.models.first().map(|m| m.id.clone()))
    }) {
        Some(id) => id,
        None => {
            eprintln!("❌ No models configured for provider '{provider_id}'.");
            std::process::exit(1);
        }
    };
    let persona_id =
        persona.or_else(|| config.personas.first().map(|p| p.id.clone())).unwrap_or_default();

    let orchestrator = ChatOrchestrator::from_config(config)?;
    orchestrator.create_session(SESSION_ID, &provider_id, &model_id, &persona_id)?;

    let mut stream = orchestrator
        .handle_turn_streaming(SESSION_ID, &prompt, &files)
        .await?;

    while let Some(event) = stream.events.recv().await {
        match event {
            StreamEvent::Delta(delta) => {
                print!("{}", delta.delta_text);
                io::stdout().flush()?;
            }
            StreamEvent::Done(_) => {
                println!();
                break;
            }
            StreamEvent::Failed(err) => {
                eprintln!("\n❌ Error: {err}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
