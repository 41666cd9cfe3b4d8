//! Admin Gate
//!
//! Static allow-list of operator identities. Every admin-only action checks
//! the gate before doing anything else.

use crate::error::RelayError;
use crate::telegram::traits::UserId;
use std::collections::HashSet;
use tracing::warn;

/// Admin-only actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminAction {
    Panel,
    ListUsers,
    Stats,
    ManualSignal,
    Broadcast,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Panel => "panel",
            AdminAction::ListUsers => "list_users",
            AdminAction::Stats => "stats",
            AdminAction::ManualSignal => "manual_signal",
            AdminAction::Broadcast => "broadcast",
        }
    }

    /// How a non-admin is turned away.
    pub fn denial(&self) -> Denial {
        match self {
            AdminAction::Panel | AdminAction::ListUsers => Denial::Silent,
            AdminAction::Stats | AdminAction::ManualSignal | AdminAction::Broadcast => {
                Denial::Explicit
            }
        }
    }
}

/// Reply policy on denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// No reply at all
    Silent,
    /// "Not authorized" reply
    Explicit,
}

#[derive(Debug, Clone, Default)]
pub struct AdminGate {
    admins: HashSet<UserId>,
}

impl AdminGate {
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    /// Check `user` for `action`.
    pub fn authorize(&self, user: UserId, action: AdminAction) -> Result<(), RelayError> {
        if self.is_admin(user) {
            return Ok(());
        }
        warn!(user = %user, action = action.as_str(), "Admin action denied");
        Err(RelayError::Authorization(user))
    }

    pub fn len(&self) -> usize {
        self.admins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let gate = AdminGate::new([UserId(1), UserId(2)]);

        assert!(gate.is_admin(UserId(1)));
        assert!(!gate.is_admin(UserId(3)));
        assert!(gate.authorize(UserId(2), AdminAction::Broadcast).is_ok());

        let err = gate.authorize(UserId(3), AdminAction::Broadcast).unwrap_err();
        assert!(matches!(err, RelayError::Authorization(UserId(3))));
    }

    #[test]
    fn test_empty_gate_denies_everyone() {
        let gate = AdminGate::default();
        assert!(gate.is_empty());
        assert!(gate.authorize(UserId(1), AdminAction::Stats).is_err());
    }

    #[test]
    fn test_denial_policy() {
        assert_eq!(AdminAction::Panel.denial(), Denial::Silent);
        assert_eq!(AdminAction::ListUsers.denial(), Denial::Silent);
        assert_eq!(AdminAction::Stats.denial(), Denial::Explicit);
        assert_eq!(AdminAction::ManualSignal.denial(), Denial::Explicit);
        assert_eq!(AdminAction::Broadcast.denial(), Denial::Explicit);
    }
}
