//! Authenticated encryption for the file-backed secret store.
//!
//! - `Keyset`: persisted symmetric key, generated once per directory
//! - `AeadCipher`: seal/open with a fixed application-scoped associated data

pub mod cipher;
pub mod keyset;

pub use cipher::AeadCipher;
pub use keyset::{AeadAlgorithm, Keyset};

/// Associated data bound into every ciphertext written by this application.
/// Bump the version suffix if the blob format ever changes.
pub const ASSOCIATED_DATA: &[u8] = b"credvault-token-v1";
