//! Core type definitions for ledger primitives.
//!
//! This module provides the fundamental types used throughout the engine:
//! - `Hash`: fixed-size 32-byte SHA3-256 hashes, the universal entity ID
//! - `Payload`: opaque JSON data bags carried by outputs, inputs and blocks
//! - `codec`: canonical serialization helpers and decode errors

pub mod codec;
pub mod hash;
pub mod payload;
