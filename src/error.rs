use thiserror::Error;

/// Fallback shown when the server gives us nothing usable.
pub(crate) const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Error taxonomy for the authentication core.
///
/// Every failure crossing the public surface is normalized into one of these
/// variants; raw transport or serialization errors never escape. The type is
/// `Clone` so a single refresh outcome can fan out to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The access token could not be parsed as an encoded-claims token
    #[error("malformed token: {reason}")]
    MalformedToken { reason: String },

    /// The server rejected the credentials or the refresh token
    #[error("authentication rejected: {message}")]
    AuthRejected { message: String },

    /// Transient network or server failure; session state is left untouched
    #[error("network or server error: {message}")]
    NetworkOrServer {
        message: String,
        status: Option<u16>,
    },

    /// The permission set could not be fetched
    #[error("failed to load permissions: {message}")]
    PermissionLoad { message: String },

    /// The blob store failed to read or write
    #[error("storage error: {message}")]
    Storage { message: String },

    /// An operation required an authenticated session and none was present
    #[error("no authenticated session")]
    NotAuthenticated,
}

impl AuthError {
    /// True if the server rejected the credentials themselves. During refresh
    /// this is fatal to the session.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, AuthError::AuthRejected { .. })
    }

    /// True for failures that are eligible for a natural retry on the next
    /// user action.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::NetworkOrServer { .. })
    }

    /// Human-readable message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            AuthError::AuthRejected { message } | AuthError::NetworkOrServer { message, .. } => {
                if message.is_empty() {
                    GENERIC_ERROR_MESSAGE.to_string()
                } else {
                    message.clone()
                }
            }
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Create a malformed-token error
pub fn malformed_token(reason: impl Into<String>) -> AuthError {
    AuthError::MalformedToken {
        reason: reason.into(),
    }
}

/// Create an auth-rejected error
pub fn auth_rejected(message: impl Into<String>) -> AuthError {
    AuthError::AuthRejected {
        message: message.into(),
    }
}

/// Create a network/server error
pub fn network_error(message: impl Into<String>, status: Option<u16>) -> AuthError {
    AuthError::NetworkOrServer {
        message: message.into(),
        status,
    }
}

/// Create a permission-load error
pub fn permission_load_failed(message: impl Into<String>) -> AuthError {
    AuthError::PermissionLoad {
        message: message.into(),
    }
}

/// Create a storage error
pub fn storage_error(message: impl Into<String>) -> AuthError {
    AuthError::Storage {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_not_transient() {
        let err = auth_rejected("invalid refresh token");
        assert!(err.is_auth_rejection());
        assert!(!err.is_transient());
    }

    #[test]
    fn network_error_is_transient() {
        let err = network_error("connection reset", Some(502));
        assert!(err.is_transient());
        assert!(!err.is_auth_rejection());
    }

    #[test]
    fn user_message_falls_back_to_generic() {
        assert_eq!(
            AuthError::NotAuthenticated.user_message(),
            GENERIC_ERROR_MESSAGE
        );
        assert_eq!(auth_rejected("").user_message(), GENERIC_ERROR_MESSAGE);
        assert_eq!(
            auth_rejected("Invalid credentials").user_message(),
            "Invalid credentials"
        );
    }
}
