//! Shared foundational types used across the Kiln hardware-construction library.
//!
//! This crate provides the fixed-width [`BitVector`] value type carried by every
//! graph node, XXH3 content hashing used for graph fingerprints, and the
//! per-circuit name table for ports and labelled nodes.

#![warn(missing_docs)]

pub mod bitvector;
pub mod hash;
pub mod ident;

pub use bitvector::{BitVector, ParseBitVectorError};
pub use hash::{ContentHash, ContentHasher};
pub use ident::{Name, NameTable};
