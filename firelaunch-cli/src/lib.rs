//! Command-line front end for the firelaunch microVM orchestrator.
//!
//! The binary is a thin shell around [`commands::run`]; everything it does
//! is reachable from this library so argument parsing and command wiring
//! can be tested without spawning a process.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
