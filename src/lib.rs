//! # kbchat
//!
//! A retrieval-augmented chatbot backend over an uploaded document
//! knowledge base.
//!
//! Documents are uploaded, their text extracted and split into overlapping
//! chunks, and each chunk embedded into a vector store. Questions are
//! embedded the same way; the closest chunks become the context of a
//! grounded prompt, and the chat model's answer is returned with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Extract ▸ Chunk ▸    │──▶│ Vector store │
//! │ CLI/HTTP │   │ Embed ▸ Upsert       │   │ SQLite / mem │
//! └──────────┘   └──────────┬───────────┘   └──────┬───────┘
//!                           ▼                      │
//!                   ┌──────────────┐               │
//!                   │ Object store │               │
//!                   │ local/mem/S3 │               │
//!                   └──────────────┘               ▼
//!                                   ┌──────────────────────────┐
//!          question ───────────────▶│ Embed ▸ Top-K ▸ Prompt ▸ │──▶ answer + citations
//!                                   │ Chat completion          │
//!                                   └──────────────────────────┘
//! ```
//!
//! The runtime-free types and algorithms (chunking, ranking, prompt
//! assembly, the adapter traits and in-memory adapters) live in the
//! `kbchat-core` crate. This crate adds the HTTP providers, SQLite and S3
//! adapters, the pipelines, the HTTP API and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Builds every service from one config |
//! | [`extract`] | Text extraction by content type |
//! | [`analyze`] | Title / category / topics / summary derivation |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat completion providers |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`objects`] | Raw file storage (local, S3) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`answer`] | Retrieval-augmented query pipeline |
//! | [`registry`] | Document lifecycle and reconciliation |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyze;
pub mod answer;
pub mod app;
pub mod completion;
pub mod config;
pub mod db;
pub mod docs_cmd;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod locks;
pub mod migrate;
pub mod objects;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod search;
pub mod seed;
pub mod server;
pub mod sqlite_store;
pub mod stats;
