//! `citylayout-auth` — token validation boundary.
//!
//! Resolves a bearer token to a trusted account identity plus its roles.
//! This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod roles;
pub mod validator;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use roles::Role;
pub use validator::{Hs256JwtValidator, JwtValidator};
