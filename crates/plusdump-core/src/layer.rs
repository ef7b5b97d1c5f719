//! Contract with the surrounding packet decoding framework.
//!
//! The framework owns the decoder chain. It hands raw bytes to a layer's
//! decode entry point together with a [`PacketBuilder`], and it asks the
//! detector registry for a [`LayerType`] when transport ports are not
//! conclusive. The types here are the minimal surface both sides share.

use crate::error::Result;
use std::fmt;

/// Opaque, comparable identifier of a protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerType(pub u32);

impl LayerType {
    /// Opaque application payload, "no further layer"
    pub const PAYLOAD: LayerType = LayerType(1);
    /// User Datagram Protocol
    pub const UDP: LayerType = LayerType(17);
    /// Transmission Control Protocol
    pub const TCP: LayerType = LayerType(6);
    /// Path Layer UDP Substrate
    pub const PLUS: LayerType = LayerType(1000);

    /// Returns a human readable name for well-known layer types
    pub fn name(&self) -> &'static str {
        match *self {
            LayerType::PAYLOAD => "Payload",
            LayerType::UDP => "UDP",
            LayerType::TCP => "TCP",
            LayerType::PLUS => "PLUS",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            "Unknown" => write!(f, "LayerType({})", self.0),
            name => f.write_str(name),
        }
    }
}

/// A decoded layer as the framework stores it
pub trait Layer: fmt::Debug {
    /// Identity of this layer
    fn layer_type(&self) -> LayerType;

    /// Bytes making up this layer's header
    fn contents(&self) -> &[u8];

    /// Bytes following this layer's header
    fn payload(&self) -> &[u8];
}

/// A transport layer that exposes ports and a port-to-layer mapping
pub trait TransportLayer {
    /// Protocol name, e.g. `"udp"` or `"tcp"`
    fn protocol_name(&self) -> &str;

    /// Source port
    fn src_port(&self) -> u16;

    /// Destination port
    fn dst_port(&self) -> u16;

    /// Layer type registered for a port, [`LayerType::PAYLOAD`] when none is
    fn layer_type_for_port(&self, port: u16) -> LayerType;

    /// Layer type the framework should decode next
    ///
    /// The destination port wins; the source port is consulted only when the
    /// destination maps to [`LayerType::PAYLOAD`].
    fn next_layer_type(&self) -> LayerType {
        match self.layer_type_for_port(self.dst_port()) {
            LayerType::PAYLOAD => self.layer_type_for_port(self.src_port()),
            lt => lt,
        }
    }
}

/// Feedback object handed to decode entry points
///
/// The `'a` lifetime ties decoded layers to the captured buffer they borrow.
pub trait PacketBuilder<'a> {
    /// The transport layer decoded immediately before the current one, if any
    fn last_transport(&self) -> Option<&dyn TransportLayer>;

    /// Record a decoded layer
    fn add_layer(&mut self, layer: Box<dyn Layer + 'a>);

    /// Ask the framework to continue decoding the remaining payload as `next`
    fn next_decoder(&mut self, next: LayerType) -> Result<()>;
}
