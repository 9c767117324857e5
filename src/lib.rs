// Módulos de la aplicación
pub mod api;
pub mod app_state;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod lexical;
pub mod llm;
pub mod models;
pub mod providers;
pub mod rag;
pub mod rerank;
pub mod vector_store;
