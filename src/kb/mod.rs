//! Archive collaborators: the existence oracle and the provenance service.

pub mod client;
pub mod memory;
pub mod provenance;
