//! `gemline doctor`: diagnose configuration and upstream reachability.

use gemline_channels::{LineChannel, LineChannelConfig};
use gemline_config::AppConfig;
use gemline_core::channel::Channel;
use gemline_core::provider::InferenceBackend;
use gemline_providers::GeminiProvider;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("gemline doctor");
    println!("==============\n");

    let mut issues = 0;

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Err(e.into());
        }
    };

    match config.require_secrets() {
        Ok(()) => println!("  ✅ Credentials present"),
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    println!(
        "  ℹ️  Model {} with a {}-token history budget",
        config.gemini.model, config.conversation.history_token_budget
    );

    if config.gemini.api_key.is_some() {
        match GeminiProvider::from_config(&config.gemini) {
            Ok(provider) => match provider.health_check(&config.gemini.model).await {
                Ok(true) => println!("  ✅ Gemini reachable, model found"),
                Ok(false) => {
                    println!("  ⚠️  Gemini answered but the model check failed");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Gemini unreachable: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Gemini client: {e}");
                issues += 1;
            }
        }
    }

    if let Ok(line_config) = LineChannelConfig::from_app_config(&config.line) {
        match LineChannel::new(line_config) {
            Ok(channel) => match channel.health_check().await {
                Ok(true) => println!("  ✅ LINE token accepted"),
                Ok(false) => {
                    println!("  ⚠️  LINE rejected the channel access token");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ LINE unreachable: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ LINE client: {e}");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
