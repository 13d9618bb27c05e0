//! # vaultsync
//!
//! Keeps a semantic search index in step with a git-tracked markdown vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌───────────┐
//! │ Repository  │──▶│      Reconciler      │──▶│  SQLite    │
//! │ git / local │   │ classify → normalize │   │ FTS5+Vec   │
//! └─────────────┘   │ → chunk → upsert     │   └─────┬─────┘
//!                   └──────────┬───────────┘         │
//!                              ▼                     ▼
//!                        ┌──────────┐          ┌──────────┐
//!                        │   CLI    │          │   HTTP   │
//!                        │ (vsync)  │          │ SSE/JSON │
//!                        └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vsync init                    # create database
//! vsync setup                   # clone the vault and index everything
//! vsync sync                    # pull upstream changes, re-index what changed
//! vsync search "weekly review" --tag journal
//! vsync serve                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`reconcile`] | Full, incremental, and rebuild syncs |
//! | [`progress`] | Progress sinks and ETA |
//! | [`git_repo`] | Git-backed repository provider |
//! | [`local_vault`] | Plain-directory repository provider |
//! | [`sqlite_store`] | SQLite index store |
//! | [`embedding`] | Embedding providers |
//! | [`tokenizer`] | Token counter construction |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod git_repo;
pub mod local_vault;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod reconcile;
pub mod server;
pub mod sqlite_store;
pub mod tokenizer;
