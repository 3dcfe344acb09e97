//! Core types shared by every store: errors, configuration, identifiers,
//! the container model and its serializer, and the SQLite helpers.

pub mod config;
pub mod containers;
pub mod db;
pub mod error;
pub mod identifiers;
pub mod schemas;
pub mod serializer;
pub mod session;
pub mod time;
