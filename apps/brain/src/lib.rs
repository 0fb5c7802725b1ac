//! # brain
//!
//! Command-line front end for the brain-core engine.
//!
//! Exposed as a library so the command implementations and the config
//! loader can be tested without spawning the binary.

pub mod cli;
pub mod config;
