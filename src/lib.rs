//! # docchat
//!
//! A document question-answering service: upload PDF documents, then ask
//! natural-language questions answered from their content, with source
//! attribution and conversational memory.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ loader ──▶ chunk ──▶ embed ──▶ SQLite vector index
//!                                               │
//! query ──▶ reformulate ──▶ embed ──▶ search ───┘
//!                │                      │
//!              history            grounded synthesis ──▶ answer + sources
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init                              # create database
//! docchat ingest report.pdf                 # index a document
//! docchat ask "What does the report say?"   # one-shot question
//! docchat serve                             # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | PDF page extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding capability |
//! | [`llm`] | Text-generation capability |
//! | [`index`] | Persistent vector index |
//! | [`reformulate`] | Standalone-question rewriting |
//! | [`rag`] | Ingestion and answering pipeline |
//! | [`history`] | Per-session conversation history |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod history;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod reformulate;
pub mod server;
