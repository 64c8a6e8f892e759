//! quietdiskd internals shared between the binary and its integration tests

pub mod api;
pub mod config;
