//! # doccollab-auth
//!
//! Stateless verification of the bearer tokens clients present over an
//! already-open connection. Tokens are HS256 JWTs carrying a subject (user
//! id) and expiry; the login service that issues them shares the signing
//! secret, so verification never needs a network round trip.

#![deny(unsafe_code)]

pub mod errors;
pub mod token;

pub use errors::AuthError;
pub use token::{Claims, TokenIssuer, TokenVerifier};
