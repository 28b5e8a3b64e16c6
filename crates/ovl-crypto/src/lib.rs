//! Hashing primitives for ovl.
//!
//! Provides domain-separated BLAKE3 hashing so that a blob, a tree and a
//! commit with identical bytes never share an object id.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::ContentHasher;
