use std::error::Error;

use crate::core::config::Config;

pub fn list_providers(config: &Config) -> Result<(), Box<dyn Error>> {
    if config.providers.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    println!("Configured providers:");
    println!();
    for provider in &config.providers {
        let credential_status = if !provider.requires_credential {
            "no credential needed".to_string()
        } else if provider.resolve_credential().is_some() {
            format!("✅ {}", provider.credential_env_name())
        } else {
            format!("❌ {} not set", provider.credential_env_name())
        };
        println!("  • {} ({})", provider.id, provider.display_name);
        if !provider.base_url.is_empty() {
            println!("    URL: {}", provider.base_url);
        }
        println!("    Credential: {credential_status}");
        println!(
            "    Streaming: {}",
            if provider.supports_streaming {
                "yes"
            } else {
                "no"
            }
        );
        println!();
    }

    Ok(())
}
