//! Structured scan event log: JSONL writer fed by a dedicated logger thread.

pub mod events;
pub mod jsonl;
