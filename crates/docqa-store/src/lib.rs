//! docqa-store - In-memory embedding-similarity store
//!
//! This crate holds a loaded corpus snapshot (fragments plus embeddings) and
//! serves nearest-neighbour searches and corpus term statistics to the
//! retrieval pipeline.

mod memory;

pub use memory::MemoryStore;
