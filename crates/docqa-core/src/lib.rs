//! docqa-core - Core types and traits for document question answering
//!
//! This crate provides the foundational types, collaborator traits, error
//! handling and configuration used throughout the docqa retrieval pipeline.

pub mod config;
pub mod error;
pub mod text;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
