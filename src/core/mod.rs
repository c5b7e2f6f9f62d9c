pub mod assembler;
pub mod config;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod store;
