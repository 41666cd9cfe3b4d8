use super::config::{default_config_path, RelayConfig};
use super::logging;
use relaybot::store::Database;
use relaybot::telegram::{BotApiClient, RelayBot};
use std::path::PathBuf;
use tracing::info;

/// Run the bot service
///
/// Loads the config (`--config` or `~/.config/relaybot/config.toml`), opens
/// the database, and long-polls the Bot API until Ctrl-C. In-flight updates
/// finish before the process exits.
///
/// A missing config file is an error; use `relaybot init-config` to create
/// one. `RELAYBOT_BOT_TOKEN` overrides the token in the file.
pub async fn execute(
    config_path: Option<String>,
    database: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        return Err(format!(
            "config file '{}' not found (create one with `relaybot init-config`)",
            config_path.display()
        )
        .into());
    }

    let mut config = RelayConfig::load(&config_path)?;
    if let Some(database) = database {
        config.storage.database_path = PathBuf::from(database);
    }

    logging::init(&config.logging)?;

    let db_path = &config.storage.database_path;
    let db = Database::open(&db_path.to_string_lossy()).await?;

    let client = BotApiClient::new(
        config.bot_token()?,
        &config.telegram.api_base,
        config.telegram.poll_timeout_secs,
    )?;
    let bot_config = config.bot_config()?;

    info!(
        config = %config_path.display(),
        database = %db_path.display(),
        channel = bot_config.channel.0,
        admins = bot_config.admins.len(),
        "starting relaybot"
    );

    let bot = RelayBot::new(client, db, bot_config);
    bot.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await;

    info!("relaybot stopped");
    Ok(())
}
