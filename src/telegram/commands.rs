//! Private Message Commands
//!
//! User commands: /start, /menu, /profile, /link, /status, /cancel, /help
//! Admin commands: /admin, /stats, /users, /signal, /broadcast

use crate::admin::AdminAction;

/// PM command types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start or resume; optional invite token payload
    Start { token: Option<String> },

    /// Show main menu
    Menu,

    /// Show stored profile
    Profile,

    /// Issue a one-time channel invite link
    Link,

    /// Refresh and report channel membership
    Status,

    /// Cancel registration or admin compose mode
    Cancel,

    /// Show help
    Help,

    /// Admin panel
    Admin,

    /// Admin statistics
    Stats,

    /// Paginated user list (pages start at 1)
    Users { page: u32 },

    /// Signal to channel members; compose mode when `text` is `None`
    Signal { text: Option<String> },

    /// Broadcast to all active users; compose mode when `text` is `None`
    Broadcast { text: Option<String> },

    /// Unknown command
    Unknown(String),
}

impl Command {
    /// Get command syntax and description for help text
    ///
    /// Returns (command_syntax, description) tuple.
    pub fn help_text(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Command::Start { .. } => Some(("/start", "Register or open the main menu")),
            Command::Menu => Some(("/menu", "Show the main menu")),
            Command::Profile => Some(("/profile", "Show your profile")),
            Command::Link => Some(("/link", "Get a one-time channel invite link")),
            Command::Status => Some(("/status", "Check your channel membership")),
            Command::Cancel => Some(("/cancel", "Cancel the current operation")),
            Command::Help => Some(("/help", "Show this help message")),
            Command::Admin => Some(("/admin", "Admin panel")),
            Command::Stats => Some(("/stats", "Channel and user statistics")),
            Command::Users { .. } => Some(("/users [page]", "List registered users")),
            Command::Signal { .. } => {
                Some(("/signal [text]", "Send a signal to channel members"))
            }
            Command::Broadcast { .. } => {
                Some(("/broadcast [text]", "Send a message to all active users"))
            }
            Command::Unknown(_) => None,
        }
    }

    /// Gate check required before running this command, if any.
    pub fn admin_action(&self) -> Option<AdminAction> {
        match self {
            Command::Admin => Some(AdminAction::Panel),
            Command::Stats => Some(AdminAction::Stats),
            Command::Users { .. } => Some(AdminAction::ListUsers),
            Command::Signal { .. } => Some(AdminAction::ManualSignal),
            Command::Broadcast { .. } => Some(AdminAction::Broadcast),
            _ => None,
        }
    }

    pub fn is_admin_only(&self) -> bool {
        self.admin_action().is_some()
    }

    /// User-facing commands for help listing
    pub fn user_commands() -> Vec<(&'static str, &'static str)> {
        [
            Command::Start { token: None },
            Command::Menu,
            Command::Profile,
            Command::Link,
            Command::Status,
            Command::Cancel,
            Command::Help,
        ]
        .iter()
        .filter_map(Command::help_text)
        .collect()
    }

    /// Admin commands for help listing
    pub fn admin_commands() -> Vec<(&'static str, &'static str)> {
        [
            Command::Admin,
            Command::Stats,
            Command::Users { page: 1 },
            Command::Signal { text: None },
            Command::Broadcast { text: None },
        ]
        .iter()
        .filter_map(Command::help_text)
        .collect()
    }
}

/// Parse a private message as a command.
///
/// Returns `None` for plain text. `/cmd@botname` is accepted. Text arguments
/// keep their line breaks.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    let arg = (!args.is_empty()).then(|| args.to_string());

    let command = match name {
        "start" => Command::Start { token: arg },
        "menu" => Command::Menu,
        "profile" => Command::Profile,
        "link" => Command::Link,
        "status" => Command::Status,
        "cancel" => Command::Cancel,
        "help" => Command::Help,
        "admin" => Command::Admin,
        "stats" => Command::Stats,
        "users" => Command::Users {
            page: args
                .split_whitespace()
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .filter(|p| *p > 0)
                .unwrap_or(1),
        },
        "signal" => Command::Signal { text: arg },
        "broadcast" => Command::Broadcast { text: arg },
        _ => Command::Unknown(head.to_string()),
    };

    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_parse_start() {
        assert_eq!(parse_command("/start"), Some(Command::Start { token: None }));
        assert_eq!(
            parse_command("/start abc123"),
            Some(Command::Start {
                token: Some("abc123".to_string())
            })
        );
    }

    #[test]
    fn test_parse_with_bot_suffix() {
        assert_eq!(parse_command("/menu@relay_bot"), Some(Command::Menu));
        assert_eq!(
            parse_command("/start@relay_bot tok"),
            Some(Command::Start {
                token: Some("tok".to_string())
            })
        );
    }

    #[test]
    fn test_parse_users_page() {
        assert_eq!(parse_command("/users"), Some(Command::Users { page: 1 }));
        assert_eq!(parse_command("/users 3"), Some(Command::Users { page: 3 }));
        assert_eq!(parse_command("/users 0"), Some(Command::Users { page: 1 }));
        assert_eq!(parse_command("/users abc"), Some(Command::Users { page: 1 }));
    }

    #[test]
    fn test_parse_signal_keeps_line_breaks() {
        assert_eq!(
            parse_command("/signal BTC long\nTP 64000\nSL 60000"),
            Some(Command::Signal {
                text: Some("BTC long\nTP 64000\nSL 60000".to_string())
            })
        );
        assert_eq!(parse_command("/broadcast"), Some(Command::Broadcast { text: None }));
        assert_eq!(parse_command("/broadcast   "), Some(Command::Broadcast { text: None }));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(
            parse_command("/frobnicate now"),
            Some(Command::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_admin_only() {
        assert!(Command::Stats.is_admin_only());
        assert!(Command::Signal { text: None }.is_admin_only());
        assert!(!Command::Profile.is_admin_only());
        assert!(!Command::Start { token: None }.is_admin_only());
    }

    #[test]
    fn test_help_listings() {
        let user = Command::user_commands();
        assert_eq!(user.len(), 7);
        assert!(user.iter().any(|(syntax, _)| *syntax == "/link"));

        let admin = Command::admin_commands();
        assert_eq!(admin.len(), 5);
        assert!(admin.iter().all(|(syntax, _)| !user.iter().any(|(u, _)| u == syntax)));
    }
}
