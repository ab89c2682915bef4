//! Banquet query engine: resolves dataset URLs against sqlite stores,
//! compiles them into SQL, and streams results back as newline-delimited
//! JSON frames.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod registry;
pub mod schema;
pub mod sql;
pub mod stream;
