//! CLI module for labelq - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for rendering label files,
//! inspecting configuration and classifying plans.

pub mod commands;

pub use commands::Cli;
