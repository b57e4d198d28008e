//! Auth error types.

/// Why a presented credential was not accepted.
///
/// Every variant is fatal to the connection: the session transitions to
/// `Rejected` and is closed with the authentication-failure close code.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `auth` envelope carried no token at all.
    #[error("Authentication required")]
    MissingToken,

    /// The token could not be decoded, its signature did not verify, or a
    /// required claim was absent.
    #[error("Invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    /// The token decoded and verified but its expiry is in the past.
    #[error("Invalid token")]
    Expired,
}
