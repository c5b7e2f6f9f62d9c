//! Model listing functionality
//!
//! Lists the models declared in configuration for one provider.

use std::error::Error;

use crate::core::config::Config;

pub fn list_models(config: &Config, provider: Option<&str>) -> Result<(), Box<dyn Error>> {
    let provider = match provider {
        Some(id) => config
            .find_provider(id)
            .ok_or_else(|| format!("Unknown provider: {id}"))?,
        None => config
            .providers
            .first()
            .ok_or("No providers configured.")?,
    };

    println!("Models for {} ({}):", provider.id, provider.display_name);
    println!();
    if provider.models.is_empty() {
        println!("  No models configured for this provider.");
        return Ok(());
    }

    for model in &provider.models {
        println!("  • {}", model.id);
        if model.display_name != model.id {
            println!("    Name: {}", model.display_name);
        }
        if let Some(window) = model.context_window_tokens {
            println!("    Context window: {window} tokens");
        }
        if let Some(max) = model.max_output_tokens {
            println!("    Max output: {max} tokens");
        }
        println!();
    }

    Ok(())
}
