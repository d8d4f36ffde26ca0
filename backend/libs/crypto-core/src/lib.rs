//! Cryptographic primitives shared by Nova services.
//!
//! - `jwt`: session token issue/verify

pub mod jwt;

pub use jwt::{Claims, SessionTokens, TokenError};
