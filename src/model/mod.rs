//! Merkle node model: identifiers, the pre-built tree, and per-node status.

pub mod identifier;
pub mod status;
pub mod tree;
