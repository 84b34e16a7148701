//! # NAN SDF Codec Module
//!
//! Byte-exact encode/decode of NAN Service Discovery Frame TLV attributes.
//! Pure: no engine state, no I/O.
//!
//! ## Key Types
//!
//! - [`Sda`] / [`Sdea`] / [`ElementContainer`] - the SDF attributes
//! - [`TlvWriter`] / [`TlvReader`] - bounds-tracked attribute framing
//! - [`build_sdf`] / [`parse_sdf`] - whole-frame entry points
//! - [`ServiceId`] - 6-byte hash-derived service identifier
//!
//! ## Example
//!
//! ```ignore
//! use nan_usd::codec::{build_sdf, SdfSpec, SdfType, ServiceId};
//!
//! let frame = build_sdf(&SdfSpec {
//!     subtype: SdfType::Publish,
//!     service_id: ServiceId::from_name("printer"),
//!     instance_id: 1,
//!     requestor_instance_id: 0,
//!     proto_type: 2,
//!     ssi: Some(b"ipp"),
//!     elems: None,
//!     with_sdea: true,
//!     fsd_required: false,
//!     fsd_with_gas: false,
//! });
//! ```

pub mod attrs;
pub mod frame;
pub mod tlv;

pub use attrs::{ElementContainer, Sda, Sdea, SdfType, ServiceId, ServiceInfo};
pub use frame::{build_sdf, parse_sdf, PeerSda, SdfSpec};
pub use tlv::{TlvReader, TlvWriter};

use thiserror::Error;

/// Errors raised while decoding a received frame.
///
/// Attribute-level errors never leave [`parse_sdf`]; they drop the
/// offending attribute and the walk continues. Only [`DecodeError::NotSdf`]
/// reaches the engine, which ignores such frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A declared length runs past the end of the available bytes.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Service control type value outside Publish/Subscribe/FollowUp.
    #[error("unknown service control type {0}")]
    UnknownSubtype(u8),

    /// The buffer does not start with a NAN SDF header.
    #[error("not a NAN service discovery frame")]
    NotSdf,
}
