//! The access oracle: the external authorization check consulted on `join`.
//!
//! The real implementation lives in the workspace service (document owner or
//! invited team member); the session layer only ever asks yes/no questions
//! through this trait.

use async_trait::async_trait;

use crate::ids::{DocumentId, UserId};

/// Answers "can this user read this document?".
///
/// A `join` is only granted when this returns `true`. Implementations that
/// need to fail (backend down, timeout) should deny rather than error; the
/// session layer treats every answer as final for that one message.
#[async_trait]
pub trait AccessOracle: Send + Sync {
    /// Whether `user` may open `document`.
    async fn can_access(&self, user: &UserId, document: &DocumentId) -> bool;
}
