//! Shared test utilities for markwatch integration tests.
//!
//! - `TestHarness` wires an orchestrator over a temp-dir file store
//! - `ScriptedService` plays back canned detection service responses

pub mod harness;
pub mod service;

pub use harness::TestHarness;
pub use service::ScriptedService;
