//! # plusdump-core
//!
//! A library for recognising and parsing PLUS (Path Layer UDP Substrate)
//! headers inside captured traffic.
//!
//! This crate provides:
//! - A codec translating between raw bytes and [`PlusHeader`] values
//! - A priority-ordered [`DetectorRegistry`] for port-independent layer detection
//! - The PLUS heuristic detector, matching on the header's magic
//!
//! ## Architecture
//!
//! - [`plus`]: PLUS header decoding and encoding
//! - [`detect`]: Heuristic detector registry
//! - [`layer`]: Contract with the surrounding packet decoding framework
//! - [`error`]: Error types and handling
//!
//! The codec and the registry never call each other. The framework asks the
//! registry which layer a payload belongs to, then invokes that layer's
//! decode entry point ([`decode_plus`] for PLUS).
//!
//! ## Example
//!
//! ```
//! use plusdump_core::{DetectorRegistry, LayerType, PlusHeader};
//!
//! let mut registry = DetectorRegistry::with_builtin();
//! registry.enable_detection();
//!
//! let mut packet = vec![0xD8, 0x00, 0x7F, 0xF0];
//! packet.extend_from_slice(&[0u8; 16]);
//! packet.extend_from_slice(b"hello");
//!
//! if registry.detect(&packet, "udp", 50000, 443)? == LayerType::PLUS {
//!     let header = PlusHeader::decode(&packet)?;
//!     assert_eq!(header.payload, b"hello");
//! }
//! # Ok::<(), plusdump_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`Detector`]: Plug additional protocols into the registry
//! - [`SerializeBuffer`]: Serialize headers into a framework-owned buffer
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod detect;
pub mod error;
pub mod layer;
pub mod plus;

// Re-export primary types for convenience
pub use detect::{Detector, DetectorRegistry, MAX_DETECTORS};
pub use error::{Error, Result};
pub use layer::{Layer, LayerType, PacketBuilder, TransportLayer};
pub use plus::{
    decode_plus, DecoderConfig, PacketBuffer, PlusDetector, PlusHeader, SerializeBuffer,
    PLUS_MAGIC,
};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
