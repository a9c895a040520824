//! `gemline serve`: start the webhook server.

use gemline_config::AppConfig;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    config
        .require_secrets()
        .map_err(|e| format!("Cannot serve: {e}"))?;

    println!("gemline gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.gemini.model);
    println!("   Webhook:   POST /webhook");

    gemline_gateway::start(config).await?;

    Ok(())
}
