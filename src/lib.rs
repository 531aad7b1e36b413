//! # fileflix
//!
//! A networked file storage server speaking a length-prefixed TCP protocol.
//!
//! Clients register and authenticate over a persistent socket, then upload and
//! retrieve files tracked per owner in a SQLite store, with activity recorded
//! to an append-only log. The [`server`] module hosts the accept loop, the
//! per-connection session handler, and the connection registry shared with the
//! shutdown and inactivity routines.

pub mod activity;
pub mod auth;
pub mod db;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;
pub mod storage;

pub use error::{Error, Result};
