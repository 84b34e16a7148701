//! # NAN Unsynchronized Service Discovery
//!
//! A Wi-Fi Aware (NAN) USD discovery engine: peers advertise and find named
//! services by exchanging Service Discovery Frames on social channels,
//! without NAN cluster synchronization.
//!
//! The crate splits into two layers:
//!
//! - [`codec`] - Service Discovery Frame wire format (SDA, SDEA, Element
//!   Container attributes)
//! - [`engine`] - the discovery state machine: service registry, cooperative
//!   scheduler and radio-resource bookkeeping
//!
//! The engine is platform-agnostic: it never reads a clock, never blocks and
//! never touches a socket. The embedder supplies time through each call,
//! implements [`EngineEvents`] for radio access and drives the scheduler
//! from [`DiscoveryEngine::next_deadline`].
//!
//! ## Example
//!
//! ```no_run
//! use nan_usd::{DiscoveryEngine, EngineEvents, PublishConfig, TerminateReason};
//!
//! # struct Radio;
//! # impl EngineEvents for Radio {
//! #     fn tx(&mut self, _: u32, _: u64, _: [u8; 6], _: [u8; 6], _: [u8; 6], _: &[u8]) -> std::io::Result<()> { Ok(()) }
//! #     fn listen(&mut self, _: u32, _: u64) -> std::io::Result<()> { Ok(()) }
//! #     fn discovery_result(&mut self, _: u8, _: u8, _: &[u8], _: u8, _: [u8; 6], _: bool, _: bool) {}
//! #     fn replied(&mut self, _: u8, _: [u8; 6], _: u8, _: u8, _: &[u8]) {}
//! #     fn publish_terminated(&mut self, _: u8, _: TerminateReason) {}
//! #     fn subscribe_terminated(&mut self, _: u8, _: TerminateReason) {}
//! #     fn receive(&mut self, _: u8, _: u8, _: &[u8], _: [u8; 6]) {}
//! # }
//! let mut engine = DiscoveryEngine::new([0x02, 0, 0, 0, 0, 1], false, Box::new(Radio));
//! let config = PublishConfig { unsolicited: true, ..Default::default() };
//! let _id = engine.publish(0, "org.example.printer", 2, Some(b"ready"), None, &config)?;
//! while let Some(deadline) = engine.next_deadline() {
//!     engine.tick(deadline);
//! }
//! # Ok::<(), nan_usd::UsdError>(())
//! ```

pub mod codec;
pub mod engine;
pub mod logging;

pub use codec::{DecodeError, ServiceId};
pub use engine::{
    DiscoveryEngine, EngineConfig, EngineEvents, MacAddr, PublishConfig, SubscribeConfig,
    TerminateReason, UsdError, BCAST_ADDR, MAX_SERVICES,
};
