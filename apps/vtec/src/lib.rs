//! # VTEC Application Library
//!
//! The CLI, the HTTP record-store service and its client, exposed as a
//! library so integration tests can drive them.

pub mod api;
pub mod cli;
pub mod remote;
