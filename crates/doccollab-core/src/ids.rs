//! Branded ID newtypes.
//!
//! Users, documents, and connections are all identified by opaque strings.
//! Wrapping each in its own newtype prevents passing a connection ID where a
//! document ID is expected. Freshly generated IDs are UUID v7 (time-ordered);
//! IDs arriving over the wire are accepted as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifies an authenticated user. Carried as the subject claim of the
    /// bearer token; the session layer never mints these itself.
    UserId
}

branded_id! {
    /// Identifies a document (and therefore its room). Stable, opaque,
    /// assigned by the workspace service that owns document CRUD.
    DocumentId
}

branded_id! {
    /// Identifies one open connection for its lifetime. Used for
    /// self-exclusion during broadcast.
    ConnectionId
}
