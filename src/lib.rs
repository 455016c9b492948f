//! # Course RAG
//!
//! Question answering over a corpus of course transcripts.
//!
//! Documents are parsed into courses and lessons, chunked with sentence-aware
//! overlap, embedded, and stored in two SQLite-backed collections: a course
//! catalog (one entry per course, used to resolve fuzzy course names) and
//! course content (one entry per chunk). A tool-calling language model
//! answers questions, searching the content collection when it needs to.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Documents  │──▶│  Ingest      │──▶│ VectorIndex  │
//! │ .txt files │   │ parse+chunk  │   │ catalog +    │
//! └────────────┘   └──────────────┘   │ content      │
//!                                     └──────┬───────┘
//!                                            │ search
//!  query ──▶ RagSystem ──▶ Orchestrator ◀──▶ ToolRegistry
//!               │              │
//!               ▼              ▼
//!          SessionStore   LanguageModel
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`document`] | Course document parsing |
//! | [`chunk`] | Sentence-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Storage backends for both collections |
//! | [`index`] | Vector index over catalog and content |
//! | [`ingest`] | Ingestion pipeline |
//! | [`tools`] | Tool registry, search and outline tools |
//! | [`llm`] | Language model client |
//! | [`orchestrator`] | Bounded tool-calling loop |
//! | [`session`] | Conversation history |
//! | [`rag`] | Top-level facade |
//! | [`server`] | HTTP server |
//! | [`stats`] | Index statistics |

pub mod chunk;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod rag;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod tools;
