//! shaderfarm - parallel shader compile-job scheduler.
//!
//! Jobs are handed out to a pool of compile threads through a shared atomic
//! cursor. Jobs for console platforms are compiled by long-lived worker
//! processes, one per thread, talking through request and response files in
//! a private working directory.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod manifest;
pub mod output;
pub mod paths;
pub mod scheduler;
pub mod theme;
pub mod worker;

pub use error::{Error, Result};
