//! User-facing message texts.

use crate::broadcast::{Audience, BroadcastReport};
use crate::registration::{Prompt, Tier, CANCEL_LABEL, MIN_NAME_CHARS};
use crate::store::{InviteError, SignalCategory, SignalRecord, UserRecord, UserStats};
use crate::telegram::commands::Command;
use crate::telegram::traits::Keyboard;

pub const SHARE_PHONE_LABEL: &str = "📱 Share phone number";

/// Reply text and keyboard for a registration prompt.
pub fn registration_prompt(prompt: &Prompt) -> (String, Option<Keyboard>) {
    let contact_keyboard = || Keyboard::RequestContact {
        share_label: SHARE_PHONE_LABEL.to_string(),
        cancel_label: CANCEL_LABEL.to_string(),
    };

    match prompt {
        Prompt::SharePhone => (
            "👋 Welcome!\n\nStep 1 of 3: please share your phone number using the button below."
                .to_string(),
            Some(contact_keyboard()),
        ),
        Prompt::PhoneRequired => (
            "Please use the button below to share your own phone number, or cancel.".to_string(),
            Some(contact_keyboard()),
        ),
        Prompt::EnterName => (
            "✅ Phone number saved.\n\nStep 2 of 3: please enter your full name.".to_string(),
            Some(Keyboard::Remove),
        ),
        Prompt::NameTooShort => (
            format!("The name must be at least {MIN_NAME_CHARS} characters. Please try again."),
            None,
        ),
        Prompt::ChooseTier => (
            "Step 3 of 3: choose your product access level.".to_string(),
            Some(Keyboard::Choices(Tier::labels())),
        ),
        Prompt::InvalidTier => (
            "Please pick one of the options on the keyboard.".to_string(),
            Some(Keyboard::Choices(Tier::labels())),
        ),
        Prompt::Complete => ("🎉 Registration complete!".to_string(), Some(Keyboard::Remove)),
        Prompt::Cancelled => ("❌ Registration cancelled.".to_string(), Some(Keyboard::Remove)),
        Prompt::NothingToCancel => ("Nothing to cancel.".to_string(), Some(Keyboard::Remove)),
    }
}

/// Collected profile, shown once registration completes.
pub fn profile_summary(user: &UserRecord) -> String {
    format!(
        "Name: {}\nPhone: {}\nAccess: {}",
        user.name, user.phone_number, user.tier
    )
}

pub fn registration_failed() -> String {
    "Sorry, your registration could not be saved. Please /start again.".to_string()
}

pub fn main_menu(user: &UserRecord, is_member: bool, channel_name: &str) -> String {
    let membership = if is_member {
        format!("✅ You are a member of {channel_name}.")
    } else {
        format!("⚠️ You are not a member of {channel_name} yet. Use /link to join.")
    };

    format!(
        "🏠 Main menu\n\nHello {}!\n{membership}\n\n\
         /profile - your profile\n\
         /link - channel invite link\n\
         /status - refresh membership\n\
         /help - all commands",
        user.name
    )
}

pub fn profile(user: &UserRecord) -> String {
    let username = user
        .username
        .as_deref()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| "-".to_string());
    let member = if user.channel_member { "yes" } else { "no" };

    format!(
        "👤 Profile\n\nName: {}\nUsername: {username}\nPhone: {}\nAccess: {}\nChannel member: {member}\nRegistered: {}",
        user.name, user.phone_number, user.tier, user.registered_at
    )
}

pub fn please_register() -> String {
    "You are not registered yet. Send /start to register.".to_string()
}

pub fn invite_link(url: &str, channel_name: &str, ttl: &str) -> String {
    format!(
        "🔗 Your personal invite link to {channel_name}:\n{url}\n\nThe link can be used once and expires in {ttl}."
    )
}

pub fn invite_rejected(err: &InviteError) -> String {
    let reason = match err {
        InviteError::Unknown => "is not valid",
        InviteError::AlreadyUsed => "has already been used",
        InviteError::Expired => "has expired",
        InviteError::WrongOwner => "was issued to someone else",
        InviteError::Store(_) => "could not be checked",
    };
    format!("⚠️ This invite link {reason}. Use /link to get a new one.")
}

pub fn invite_accepted(channel_name: &str) -> String {
    format!("✅ Invite accepted. Welcome to {channel_name}!")
}

pub fn membership_status(is_member: bool, channel_name: &str) -> String {
    if is_member {
        format!("✅ You are a member of {channel_name}. You will receive signals.")
    } else {
        format!("❌ You are not a member of {channel_name}. Use /link to join and receive signals.")
    }
}

pub fn channel_welcome(channel_name: &str) -> String {
    format!("🎉 Welcome to {channel_name}!\n\nYou will now receive trading signals.")
}

/// Text delivered to recipients. The audit log stores the raw body.
pub fn signal_message(category: SignalCategory, body: &str) -> String {
    let headline = match category {
        SignalCategory::ManualSignal => "📊 New signal",
        SignalCategory::Broadcast => "📢 Announcement",
        SignalCategory::AutoForward => "📈 Channel signal",
    };
    format!("{headline}\n\n{body}")
}

pub fn not_authorized() -> String {
    "⛔ You are not authorized to use this command.".to_string()
}

pub fn compose_prompt(audience: Audience) -> String {
    let target = match audience {
        Audience::AllActiveUsers => "all active users",
        Audience::ChannelMembersOnly | Audience::PassthroughFromChannel => "channel members",
    };
    format!("✍️ Send the message for {target} now, or /cancel.")
}

pub fn compose_cancelled() -> String {
    "❌ Cancelled.".to_string()
}

pub fn broadcast_report(report: &BroadcastReport) -> String {
    let mut text = format!(
        "✅ Sent to {} of {} recipients ({} failed).",
        report.sent, report.attempted, report.failed
    );
    if report.deactivated > 0 {
        text.push_str(&format!("\n{} blocked the bot and were deactivated.", report.deactivated));
    }
    if report.audit_id.is_none() {
        text.push_str("\n⚠️ The audit record could not be written.");
    }
    text
}

pub fn admin_panel(stats: &UserStats) -> String {
    let mut text = format!(
        "🛠 Admin panel\n\nUsers: {}\nChannel members: {}\nMembership rate: {:.1}%\n\n",
        stats.total,
        stats.channel_members,
        stats.membership_rate()
    );
    for (syntax, description) in Command::admin_commands() {
        text.push_str(&format!("{syntax} - {description}\n"));
    }
    text
}

pub fn stats_report(stats: &UserStats, signals: u64, recent: &[SignalRecord], now: u64) -> String {
    let mut text = format!(
        "📊 Statistics\n\nTotal users: {}\nChannel members: {}\nMembership rate: {:.1}%\nSignals sent: {signals}\n\nBy access level:\n",
        stats.total,
        stats.channel_members,
        stats.membership_rate()
    );
    for (tier, count) in &stats.by_tier {
        text.push_str(&format!("  {tier}: {count}\n"));
    }
    if !recent.is_empty() {
        text.push_str("\nRecent:\n");
        for record in recent {
            text.push_str(&format!(
                "  {} {} -> {} ({})\n",
                record.category,
                record.age_display(now),
                record.recipient_count,
                preview(&record.body, 30)
            ));
        }
    }
    text
}

pub fn users_page(users: &[UserRecord], page: u32, page_size: u32, total: u64) -> String {
    let pages = total.div_ceil(u64::from(page_size.max(1))).max(1);
    let mut text = format!("👥 Users (page {page}/{pages}, {total} total)\n\n");

    if users.is_empty() {
        text.push_str("No users on this page.\n");
    }
    for user in users {
        let member = if user.channel_member { "✅" } else { "❌" };
        text.push_str(&format!(
            "{member} {} ({}) {} [{}]\n",
            user.name, user.user_id, user.phone_number, user.tier
        ));
    }
    if u64::from(page) < pages {
        text.push_str(&format!("\nNext: /users {}", page + 1));
    }
    text
}

pub fn help(is_admin: bool) -> String {
    let mut text = String::from("Available commands:\n\n");
    for (syntax, description) in Command::user_commands() {
        text.push_str(&format!("{syntax} - {description}\n"));
    }
    if is_admin {
        text.push_str("\nAdmin commands:\n\n");
        for (syntax, description) in Command::admin_commands() {
            text.push_str(&format!("{syntax} - {description}\n"));
        }
    }
    text
}

pub fn unknown_command(name: &str) -> String {
    format!("Unknown command /{name}. Send /help for the list of commands.")
}

pub fn use_menu() -> String {
    "Send /menu to see what I can do.".to_string()
}

pub fn internal_error() -> String {
    "Something went wrong. Please try again later.".to_string()
}

/// First `max` characters of `body` on one line.
fn preview(body: &str, max: usize) -> String {
    let line = body.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_keyboards() {
        let (_, keyboard) = registration_prompt(&Prompt::SharePhone);
        assert!(matches!(keyboard, Some(Keyboard::RequestContact { .. })));

        let (_, keyboard) = registration_prompt(&Prompt::ChooseTier);
        assert_eq!(keyboard, Some(Keyboard::Choices(Tier::labels())));

        let (_, keyboard) = registration_prompt(&Prompt::NameTooShort);
        assert_eq!(keyboard, None);

        let (_, keyboard) = registration_prompt(&Prompt::Complete);
        assert_eq!(keyboard, Some(Keyboard::Remove));
    }

    #[test]
    fn test_signal_message_keeps_body() {
        let text = signal_message(SignalCategory::ManualSignal, "BTC long\nTP 64000");
        assert!(text.starts_with("📊 New signal"));
        assert!(text.ends_with("BTC long\nTP 64000"));
    }

    #[test]
    fn test_users_page_navigation() {
        let text = users_page(&[], 1, 10, 25);
        assert!(text.contains("page 1/3"));
        assert!(text.contains("/users 2"));

        let text = users_page(&[], 3, 10, 25);
        assert!(!text.contains("Next"));

        let text = users_page(&[], 1, 10, 0);
        assert!(text.contains("page 1/1"));
    }

    #[test]
    fn test_help_hides_admin_commands() {
        assert!(!help(false).contains("/broadcast"));
        assert!(help(true).contains("/broadcast"));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("line one\nline two", 20), "line one");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
