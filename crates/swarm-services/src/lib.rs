//! Filesystem-facing adapters: chunk store, peer roster, chunklist
//! parsing. Thin wrappers — no protocol logic lives here.

pub mod chunk_store;
pub mod chunklist;
pub mod roster;
