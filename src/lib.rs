//! PAMPAX: a semantic code-retrieval engine for LLM coding agents.
//!
//! The library is organized by spec component: `storage` persists every
//! entity, `chunker`/`ast`/`scan` turn a repo into chunks, `embedder`/
//! `reranker` are pluggable model providers, `intent`/`policy` decide how
//! to search, `retriever`/`graph` run the search, `token_model`/`assembler`
//! pack the result into a budget, and `interaction`/`health`/`metrics` are
//! the operational surface. `engine` wires all of it behind `PampaxEngine`,
//! the single type `main.rs`'s CLI talks to.

pub mod assembler;
pub mod ast;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod graph;
pub mod health;
pub mod indexer;
pub mod init;
pub mod intent;
pub mod interaction;
pub mod metrics;
pub mod policy;
pub mod reranker;
pub mod retriever;
pub mod scan;
pub mod storage;
pub mod token_model;
pub mod tokenizer;
pub mod types;

pub use engine::PampaxEngine;
pub use error::{PampaxError, Result};
