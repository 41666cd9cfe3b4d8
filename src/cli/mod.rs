use clap::{Parser, Subcommand};

pub mod config;
pub mod init_config;
pub mod logging;
pub mod run;
pub mod stats;
pub mod version;

#[derive(Parser)]
#[command(name = "relaybot")]
#[command(author = "relaybot contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Telegram registration and signal relay bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot (long polling until Ctrl-C)
    Run {
        /// Path to config file (default: ~/.config/relaybot/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Override storage.database_path
        #[arg(long)]
        database: Option<String>,
    },

    /// Write a commented default config file
    InitConfig {
        /// Where to write the file (default: ~/.config/relaybot/config.toml)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print user and signal statistics from the database
    Stats {
        /// Path to config file (default: ~/.config/relaybot/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Override storage.database_path
        #[arg(long)]
        database: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, database } => run::execute(config, database).await,
        Commands::InitConfig { path, force } => init_config::execute(path, force),
        Commands::Stats { config, database } => stats::execute(config, database).await,
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["relaybot", "run", "--config", "/etc/relaybot/config.toml"]);

        match cli.command {
            Commands::Run { config, database } => {
                assert_eq!(config, Some("/etc/relaybot/config.toml".to_string()));
                assert_eq!(database, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["relaybot", "run"]);

        match cli.command {
            Commands::Run { config, database } => {
                assert_eq!(config, None);
                assert_eq!(database, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_database() {
        let cli = Cli::parse_from(["relaybot", "run", "--database", "/tmp/relay.db"]);

        match cli.command {
            Commands::Run { database, .. } => {
                assert_eq!(database, Some("/tmp/relay.db".to_string()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_init_config() {
        let cli = Cli::parse_from(["relaybot", "init-config", "--path", "/tmp/c.toml", "--force"]);

        match cli.command {
            Commands::InitConfig { path, force } => {
                assert_eq!(path, Some("/tmp/c.toml".to_string()));
                assert!(force);
            }
            _ => panic!("Expected InitConfig command"),
        }
    }

    #[test]
    fn test_cli_parse_stats() {
        let cli = Cli::parse_from(["relaybot", "stats"]);
        assert!(matches!(
            cli.command,
            Commands::Stats {
                config: None,
                database: None
            }
        ));
    }

    #[test]
    fn test_cli_parse_version() {
        let cli = Cli::parse_from(["relaybot", "version"]);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["relaybot", "register"]).is_err());
    }
}
