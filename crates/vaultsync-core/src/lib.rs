//! # vaultsync core
//!
//! Runtime-free logic shared by the `vaultsync` application: the document
//! model, markdown normalization, token-bounded chunking, diff
//! classification, orphan computation, and the [`store::IndexStore`] /
//! [`repository::RepositoryProvider`] seams the reconciler is written
//! against.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The in-memory
//! implementations of both traits live here so that reconciliation logic
//! can be exercised without a database or a git checkout.

pub mod chunk;
pub mod classify;
pub mod embedding;
pub mod models;
pub mod normalize;
pub mod repository;
pub mod store;
pub mod sweep;
pub mod tokenize;
