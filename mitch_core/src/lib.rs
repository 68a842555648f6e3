//! Core engine for `mitch`: a dependency-aware PostgreSQL schema migrator.
//!
//! A [`repository::Repository`] discovers migration definitions on disk and
//! produces deterministic topological orderings over their dependency graph;
//! a [`target::Target`] records applications in a metadata schema inside the
//! managed database and reconciles them with the on-disk definitions via
//! content hashes.

pub mod errors;
pub mod identifier;
pub mod migration;
pub mod repository;
pub mod sha256;
pub mod sql;
pub mod target;
