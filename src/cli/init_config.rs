use super::config::{default_config_path, default_database_path, RelayConfig};
use std::path::PathBuf;

/// Write a commented default config file
pub fn execute(path: Option<String>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(default_config_path);

    RelayConfig::create_default(&config_path, &default_database_path(), force)?;

    println!("📝 Created: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set telegram.bot_token (or export RELAYBOT_BOT_TOKEN)");
    println!("  2. Set channel.id and channel.handle, and add the bot as channel admin");
    println!("  3. Add your Telegram user id to admin.user_ids");
    println!("  4. relaybot run --config {}", config_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_config_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let path_str = path.to_string_lossy().to_string();

        execute(Some(path_str.clone()), false).unwrap();
        assert!(path.exists());

        assert!(execute(Some(path_str.clone()), false).is_err());
        assert!(execute(Some(path_str), true).is_ok());
    }
}
