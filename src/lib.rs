// ABOUTME: Library crate for the emergency broadcast service
// ABOUTME: Exposes the orchestration pipeline, stores and channel drivers

pub mod channel;
pub mod config;
pub mod ledger;
pub mod orchestrator;
pub mod registry;
pub mod server;
pub mod store;
pub mod token;
pub mod translate;
