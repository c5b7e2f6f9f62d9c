//! Parley is a multi-provider chat core for working with remote LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration, conversation state, context assembly, and
//!   the orchestrator that drives a turn from user input to committed reply.
//! - [`providers`] holds one adapter per vendor API family, all speaking the
//!   same request/reply contract and normalizing errors into one taxonomy.
//! - [`ingest`] turns user-supplied files and directories into plain-text
//!   attachments subject to configured size and type limits.
//! - [`cli`] is the thin command-line front end for listing configuration
//!   and running one-shot prompts.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which builds the orchestrator from
//! configuration and dispatches the requested command.

pub mod cli;
pub mod core;
pub mod ingest;
pub mod providers;
pub mod utils;
