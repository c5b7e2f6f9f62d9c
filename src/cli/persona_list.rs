use std::error::Error;

use crate::core::config::Config;

pub fn list_personas(config: &Config) -> Result<(), Box<dyn Error>> {
    if config.personas.is_empty() {
        println!("No personas configured.");
        return Ok(());
    }

    println!("Configured personas:");
    println!();
    for persona in &config.personas {
        println!("  • {} ({})", persona.id, persona.display_name);
        let prompt = persona.system_prompt.trim();
        if !prompt.is_empty() {
            // First line only; prompts can run long.
            let first_line = prompt.lines().next().unwrap_or_default();
            println!("    Prompt: {first_line}");
        }
        println!();
    }

    Ok(())
}
