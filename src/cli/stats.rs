use super::config::{default_config_path, default_database_path, RelayConfig};
use relaybot::store::{unix_now, Database, SignalCategory};
use std::path::{Path, PathBuf};

/// Recent signals listed
const RECENT_SIGNALS: u32 = 5;

/// Print user and signal statistics
///
/// The database path comes from `--database`, else the config file if it
/// exists, else the default location. The bot token is not needed.
pub async fn execute(
    config_path: Option<String>,
    database: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = match database {
        Some(database) => PathBuf::from(database),
        None => database_from_config(config_path)?,
    };

    if !db_path.exists() {
        return Err(format!("database '{}' not found", db_path.display()).into());
    }

    let db = Database::open(&db_path.to_string_lossy()).await?;
    print_report(&db, &db_path).await
}

fn database_from_config(
    config_path: Option<String>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if !path.exists() {
        return Ok(default_database_path());
    }

    // Token validation does not matter here
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("failed to read config file '{}': {}", path.display(), e))?;
    let config: RelayConfig = toml::from_str(&contents)?;
    Ok(config.storage.database_path)
}

async fn print_report(db: &Database, db_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let stats = db.users().stats().await?;
    let signals = db.signals();
    let now = unix_now();

    println!("📊 relaybot statistics");
    println!("Database: {}", db_path.display());
    println!();
    println!("Users:            {}", stats.total);
    println!("Channel members:  {}", stats.channel_members);
    println!("Membership rate:  {:.1}%", stats.membership_rate());
    for (tier, count) in &stats.by_tier {
        println!("  {tier}: {count}");
    }

    println!();
    println!("Signals:          {}", signals.count(None).await?);
    for category in [
        SignalCategory::ManualSignal,
        SignalCategory::Broadcast,
        SignalCategory::AutoForward,
    ] {
        println!("  {category}: {}", signals.count(Some(category)).await?);
    }
    println!("Channel events:   {}", db.channel_events().count().await?);

    let recent = signals.recent(RECENT_SIGNALS).await?;
    if !recent.is_empty() {
        println!();
        println!("Recent:");
        for record in recent {
            println!(
                "  #{} {} {} -> {} recipients",
                record.id,
                record.category,
                record.age_display(now),
                record.recipient_count
            );
        }
    }

    Ok(())
}
