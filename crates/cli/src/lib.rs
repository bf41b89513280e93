//! disttest CLI
//!
//! Command-line front end for the disttest harness: prepare a server
//! distribution, run it, serve it until interrupted, or probe it.

pub mod commands;
pub mod output;
