//! # doccollab-core
//!
//! Shared types for the doccollab real-time session layer:
//!
//! - Branded ID newtypes (`UserId`, `DocumentId`, `ConnectionId`)
//! - The JSON wire protocol spoken over the persistent connection
//! - Traits for the two external collaborators: the access oracle
//!   (authorization checks) and the content store (durable document bodies)

#![deny(unsafe_code)]

pub mod access;
pub mod ids;
pub mod protocol;
pub mod store;

pub use access::AccessOracle;
pub use ids::{ConnectionId, DocumentId, UserId};
pub use store::{ContentStore, DocumentBody, StoreError, empty_document};
