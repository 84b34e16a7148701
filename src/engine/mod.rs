//! # USD Discovery Engine Module
//!
//! The Unsynchronized Service Discovery state machine: service registry,
//! cooperative scheduler, radio-resource bookkeeping and the callback
//! contract to the embedder.
//!
//! ## Key Types
//!
//! - [`DiscoveryEngine`] - registry + scheduler behind the public API
//! - [`EngineEvents`] - callback table to the radio/OS layer
//! - [`PublishConfig`] / [`SubscribeConfig`] - per-instance parameters
//! - [`EngineConfig`] - engine-wide timing defaults
//!
//! ## Lifecycle
//!
//! 1. Create: `DiscoveryEngine::new(local_addr, is_ap, callbacks)`
//! 2. Register services: `engine.publish(..)` / `engine.subscribe(..)`
//! 3. Drive: call `engine.tick(now)` whenever `engine.next_deadline()`
//!    passes; feed frames through `engine.rx_sdf(..)` and report radio
//!    completions through the notifier methods
//! 4. Tear down: `engine.flush()` (fires the terminated callbacks), then
//!    drop

pub mod config;
pub mod events;
pub mod machine;
pub mod radio;
pub mod service;

pub use config::EngineConfig;
pub use events::{EngineEvents, TerminateReason};
pub use machine::{DiscoveryEngine, MAX_SERVICES};
pub use radio::RadioState;
pub use service::{
    ChannelMode, MacAddr, PauseState, PublishConfig, ServiceInstance, ServiceRole,
    SubscribeConfig, BCAST_ADDR,
};

use thiserror::Error;

/// Synchronous API failures. No state changes and no callbacks accompany
/// an error return.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UsdError {
    /// Missing name, both publish modes disabled, or handle/kind mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The fixed-capacity service registry is full.
    #[error("service registry full")]
    RegistryFull,

    /// No live instance carries this handle.
    #[error("unknown service handle {0}")]
    UnknownHandle(u8),
}

mod tests;
