//! Secure memory: scoped, self-wiping containers for secret bytes
//!
//! Every secret in this crate (the private key scalar) lives in a [`SecureBuffer`].
//! Wiping goes through `zeroize`, whose volatile writes survive dead-store elimination.

pub mod buffer;

pub use buffer::{secure_clear, secure_clear_vec, SecureBuffer};
