//! Tidemark CLI - Command-line interface for Tidemark migrations.
//!
//! This crate provides the `tidemark` binary: applying migrations and
//! seed files, listing local and remote versions, and creating new
//! migration files.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
