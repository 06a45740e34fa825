//! # storelens
//!
//! A retail operations assistant. It answers natural-language questions
//! about store performance, inventory and sales by combining three kinds of
//! context into one prompt for a language model:
//!
//! - files uploaded during a session (CSV, Excel, PDF, text),
//! - files found under folders the user has registered ("configured paths"),
//! - store directory, weather and competitor lookups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ┌──────────────┐  ┌──────────┐
//! │ Uploads  │  │ Configured   │  │ Lookups  │
//! │ extract  │  │ paths (SQL)  │  │ store/wx │
//! └────┬─────┘  └──────┬───────┘  └────┬─────┘
//!      └───────────────┼───────────────┘
//!                      ▼
//!               ┌─────────────┐   ┌──────────┐   ┌──────────┐
//!               │  Composer   │──▶│   LLM    │──▶│ Format   │
//!               │ + crossref  │   │ (paced)  │   │ answer   │
//!               └─────────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text, CSV, Excel and PDF extraction |
//! | [`walk`] | Bounded directory traversal |
//! | [`paths`] | Configured path records, scanning and search |
//! | [`crossref`] | Structured values shared between files |
//! | [`compose`] | Context providers and budgeting |
//! | [`lookup`] | Store, weather and competitor data |
//! | [`llm`] | Rate-limited model client |
//! | [`format`] | Answer structuring and rupee formatting |
//! | [`assistant`] | The ask pipeline |
//! | [`session`] | Session upload store |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assistant;
pub mod commands;
pub mod compose;
pub mod config;
pub mod crossref;
pub mod db;
pub mod extract;
pub mod format;
pub mod llm;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod server;
pub mod session;
pub mod walk;
