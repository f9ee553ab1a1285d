//! # kbchat core
//!
//! Runtime-free logic for the kbchat knowledge-base chatbot: data models,
//! chunking, ranking, prompt assembly, and the traits every external
//! collaborator is reached through ([`embedding::Embedder`],
//! [`completion::ChatModel`], [`store::VectorStore`],
//! [`objects::ObjectStore`]).
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The
//! application crate supplies the concrete adapters.

pub mod chunk;
pub mod completion;
pub mod embedding;
pub mod error;
pub mod models;
pub mod objects;
pub mod prompt;
pub mod search;
pub mod store;
