//! Query scheduling: traversal policies, the worker pool and the
//! coordinator that ties them together.

pub mod engine;
pub mod policy;
pub mod summary;
pub mod worker;
