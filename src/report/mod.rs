//! Post-scan reporting: node classification and benchmark rows.

pub mod aggregate;
pub mod bench;
