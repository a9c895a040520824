//! `gemline config`: show configuration.

use gemline_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>, default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render(&config)?);
    Ok(())
}

/// Effective config as TOML with credentials masked.
fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&config.redacted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_config_masks_secrets() {
        let mut config = AppConfig::default();
        config.gemini.api_key = Some("AIza-very-secret".into());
        let out = render(&config).unwrap();
        assert!(!out.contains("AIza-very-secret"));
        assert!(out.contains("history_token_budget"));
    }

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }
}
