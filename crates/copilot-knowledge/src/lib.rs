//! Clients for the knowledge backends: text embedding, the documentation
//! vector index, and the static command catalog.

pub mod catalog;
pub mod client;
pub mod embedding;
pub mod index;

pub use catalog::{CatalogError, StaticCommandCatalog};
pub use client::KnowledgeClient;
pub use embedding::{HttpEmbeddingClient, HttpEmbeddingConfig};
pub use index::{parse_chunk, HttpKnowledgeIndexClient, HttpKnowledgeIndexConfig};
