//! Secret handling re-exports.
//!
//! Callers expose a secret only at the point it is sent over the wire.

pub use secrecy::{ExposeSecret, SecretString};
