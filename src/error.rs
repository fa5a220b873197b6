use thiserror::Error;

/// Error kinds surfaced by the messaging core and repositories.
///
/// Each variant maps to a wire-level response at the dispatcher boundary
/// (see [`crate::dispatcher`]); none of these leak internal detail to the
/// client beyond the associated message.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication required")]
    AuthRequired,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("Invalid or expired verification code")]
    InvalidOrExpiredCode,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::UpstreamFailure(err.to_string())
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::UpstreamFailure(err.to_string())
    }
}

impl ChatError {
    /// The string handed back to clients; credential failures and
    /// "user not found" are intentionally indistinguishable here.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::InvalidCredentials => "Invalid username or password".to_owned(),
            ChatError::InvalidOrExpiredCode => "Invalid or expired verification code".to_owned(),
            ChatError::AuthRequired => "Authentication required".to_owned(),
            ChatError::BadRequest(m)
            | ChatError::NotFound(m)
            | ChatError::Forbidden(m)
            | ChatError::Conflict(m)
            | ChatError::UpstreamFailure(m) => m.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_and_code_errors_never_leak_detail() {
        assert_eq!(
            ChatError::InvalidCredentials.client_message(),
            "Invalid username or password"
        );
        assert_eq!(
            ChatError::InvalidOrExpiredCode.client_message(),
            "Invalid or expired verification code"
        );
    }

    #[test]
    fn forbidden_carries_its_message_through() {
        let err = ChatError::Forbidden("You can only send messages to your friends".to_owned());
        assert_eq!(
            err.client_message(),
            "You can only send messages to your friends"
        );
    }
}
