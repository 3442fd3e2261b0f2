//! # Docuchat
//!
//! A retrieval-augmented document chat service: ingest documents, index
//! them, talk to them.
//!
//! Docuchat turns a document (PDF, TXT/MD, DOCX) into a queryable
//! knowledge asset — parse, chunk, embed, vector-index — and then answers
//! questions about it over multi-turn chat threads with streamed replies
//! and persisted history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  Loader  │──▶│ Chunk+Embed  │──▶│  SQLite    │
//! │ pdf/txt/ │   │   pipeline   │   │ assets +  │
//! │   docx   │   └──────────────┘   │  vectors  │
//! └──────────┘                      └─────┬─────┘
//!                                         │
//!              ┌───────────┐   ┌──────────┴──┐
//!   client ◀───│ streaming │◀──│  Retriever  │
//!   (SSE)      │ generator │   │  (top-k)    │
//!              └───────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docuchat init                          # create database
//! docuchat process ./data/report.pdf     # ingest a document
//! docuchat assets                        # list ingested assets
//! docuchat search "deployment" --asset <id>
//! docuchat serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy with stable machine-readable kinds |
//! | [`loader`] | Document loading and text extraction |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Per-asset vector index |
//! | [`registry`] | Asset registry and status gate |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`threads`] | Chat threads and turn history |
//! | [`retrieve`] | Status-gated top-k retrieval |
//! | [`generate`] | Generative model streaming client |
//! | [`orchestrator`] | Chat generation orchestration |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod retrieve;
pub mod server;
pub mod threads;
