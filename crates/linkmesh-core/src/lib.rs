//! Core types and trait definitions for the linkmesh backlink engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! engine, the storage backend and the API all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod adapt;
pub mod anchor;
pub mod collab;
pub mod config;
pub mod content;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod link;
pub mod risk;
pub mod store;
pub mod tier;
pub mod weighted;

pub use error::{Error, Result};
