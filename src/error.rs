//! Error taxonomy for bot operations.
//!
//! None of these is fatal to the process: handlers log them and, where a reply
//! makes sense, tell the sender.

use crate::store::{InviteError, StoreError};
use crate::telegram::traits::{TelegramError, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed user input; recovered by re-prompting
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("user {0} is not registered")]
    NotFound(UserId),

    #[error("invalid invite: {0}")]
    InviteInvalid(InviteError),

    #[error("transport error: {0}")]
    Transport(#[from] TelegramError),

    #[error("user {0} is not an admin")]
    Authorization(UserId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InviteError> for RelayError {
    fn from(err: InviteError) -> Self {
        match err {
            InviteError::Store(e) => RelayError::Store(e),
            other => RelayError::InviteInvalid(other),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_rejections_map_to_invite_invalid() {
        let err = RelayError::from(InviteError::Expired);
        assert!(matches!(err, RelayError::InviteInvalid(InviteError::Expired)));

        let err = RelayError::from(InviteError::Store(StoreError::Corrupt("x".into())));
        assert!(matches!(err, RelayError::Store(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RelayError::Authorization(UserId(7)).to_string(),
            "user 7 is not an admin"
        );
    }
}
