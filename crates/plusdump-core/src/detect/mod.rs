//! Heuristic layer detection.
//!
//! When the ports of a transport layer say nothing about the protocol
//! carried inside it, the framework can ask a [`DetectorRegistry`] to guess
//! the [`LayerType`] from the payload bytes.
//!
//! ## Priority levels
//!
//! The registry is a fixed table of [`MAX_DETECTORS`] slots. Level 0 is
//! checked first and level 127 last; the first detector that claims the
//! payload wins. Iteration follows slot order, never registration order.
//!
//! ## Lifecycle
//!
//! Registration and [`DetectorRegistry::enable_detection`] take `&mut self`
//! and belong to a single-threaded setup phase. Once built, the registry is
//! only read, so it can be shared (for example behind an `Arc`) and
//! [`DetectorRegistry::detect`] called from any number of threads.
//!
//! ```
//! use plusdump_core::detect::DetectorRegistry;
//! use plusdump_core::LayerType;
//!
//! let mut registry = DetectorRegistry::with_builtin();
//! registry.enable_detection();
//!
//! let payload = [0xD8, 0x00, 0x7F, 0xF0, 0x00];
//! assert_eq!(registry.detect(&payload, "udp", 4000, 5000)?, LayerType::PLUS);
//! # Ok::<(), plusdump_core::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::layer::{LayerType, TransportLayer};
use crate::plus::PlusDetector;
use tracing::{debug, trace};

/// Number of priority slots in a registry
pub const MAX_DETECTORS: usize = 128;

/// Level the built-in PLUS detector occupies
pub const PLUS_DETECTOR_LEVEL: usize = MAX_DETECTORS - 1;

/// A pluggable protocol detector
///
/// Implementations must be stateless with respect to `test`: the same
/// arguments always give the same answer.
pub trait Detector: Send + Sync {
    /// Returns true if the detector is certain the payload belongs to its layer
    fn test(&self, payload: &[u8], proto: &str, src_port: u16, dst_port: u16) -> bool;

    /// The layer this detector recognises
    fn layer_type(&self) -> LayerType;
}

/// Priority-ordered table of detectors
pub struct DetectorRegistry {
    slots: [Option<Box<dyn Detector>>; MAX_DETECTORS],
    enabled: bool,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("registered", &self.registered_levels().collect::<Vec<_>>())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl DetectorRegistry {
    /// Creates an empty, disabled registry
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            enabled: false,
        }
    }

    /// Creates a disabled registry with the PLUS detector at [`PLUS_DETECTOR_LEVEL`]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.slots[PLUS_DETECTOR_LEVEL] = Some(Box::new(PlusDetector));
        registry
    }

    /// Turns detection on. There is no way back.
    pub fn enable_detection(&mut self) {
        if !self.enabled {
            debug!("Heuristic layer detection enabled");
        }
        self.enabled = true;
    }

    /// Returns true once [`enable_detection`](Self::enable_detection) was called
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stores `detector` at priority `level`
    ///
    /// An occupied slot is never overwritten; the registry is left untouched
    /// on error.
    pub fn register(&mut self, level: usize, detector: Box<dyn Detector>) -> Result<()> {
        let slot = self.slots.get_mut(level).ok_or(Error::InvalidPriority {
            level,
            max: MAX_DETECTORS - 1,
        })?;

        if slot.is_some() {
            return Err(Error::DuplicateRegistration { level });
        }

        trace!(
            "Registered detector for {} at level {}",
            detector.layer_type(),
            level
        );
        *slot = Some(detector);
        Ok(())
    }

    /// Returns true if `level` holds a detector
    pub fn is_registered(&self, level: usize) -> bool {
        matches!(self.slots.get(level), Some(Some(_)))
    }

    /// Occupied levels in ascending order
    pub fn registered_levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(level, slot)| slot.as_ref().map(|_| level))
    }

    /// Guesses the layer type of `payload`
    ///
    /// Slots are consulted from level 0 upward and the first detector whose
    /// `test` returns true decides the result.
    pub fn detect(
        &self,
        payload: &[u8],
        proto: &str,
        src_port: u16,
        dst_port: u16,
    ) -> Result<LayerType> {
        if !self.enabled {
            return Err(Error::HeuristicsDisabled);
        }

        for (level, slot) in self.slots.iter().enumerate() {
            let Some(detector) = slot else {
                continue;
            };

            if detector.test(payload, proto, src_port, dst_port) {
                let layer_type = detector.layer_type();
                trace!("Detector at level {} matched {}", level, layer_type);
                return Ok(layer_type);
            }
        }

        Err(Error::NoMatch)
    }

    /// Guesses the layer type of `payload` carried by `transport`
    pub fn detect_transport(
        &self,
        payload: &[u8],
        transport: &dyn TransportLayer,
    ) -> Result<LayerType> {
        self.detect(
            payload,
            transport.protocol_name(),
            transport.src_port(),
            transport.dst_port(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Claims every payload that starts with `prefix`
    struct PrefixDetector {
        prefix: &'static [u8],
        layer_type: LayerType,
    }

    impl Detector for PrefixDetector {
        fn test(&self, payload: &[u8], _proto: &str, _src: u16, _dst: u16) -> bool {
            payload.starts_with(self.prefix)
        }

        fn layer_type(&self) -> LayerType {
            self.layer_type
        }
    }

    /// Claims traffic to a single UDP port
    struct PortDetector {
        port: u16,
        layer_type: LayerType,
    }

    impl Detector for PortDetector {
        fn test(&self, _payload: &[u8], proto: &str, _src: u16, dst: u16) -> bool {
            proto == "udp" && dst == self.port
        }

        fn layer_type(&self) -> LayerType {
            self.layer_type
        }
    }

    /// Transport stub carrying fixed ports
    struct Transport {
        kind: LayerType,
        src: u16,
        dst: u16,
    }

    impl TransportLayer for Transport {
        fn protocol_name(&self) -> &str {
            match self.kind {
                LayerType::TCP => "tcp",
                _ => "udp",
            }
        }

        fn src_port(&self) -> u16 {
            self.src
        }

        fn dst_port(&self) -> u16 {
            self.dst
        }

        fn layer_type_for_port(&self, _port: u16) -> LayerType {
            LayerType::PAYLOAD
        }
    }

    fn prefix(prefix: &'static [u8], id: u32) -> Box<dyn Detector> {
        Box::new(PrefixDetector {
            prefix,
            layer_type: LayerType(id),
        })
    }

    #[test]
    fn test_detect_requires_enable() {
        let mut registry = DetectorRegistry::new();
        registry.register(0, prefix(b"AB", 10)).unwrap();

        assert_eq!(
            registry.detect(b"ABC", "udp", 1, 2),
            Err(Error::HeuristicsDisabled)
        );

        registry.enable_detection();
        assert_eq!(registry.detect(b"ABC", "udp", 1, 2), Ok(LayerType(10)));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = DetectorRegistry::new();
        registry.register(5, prefix(b"AB", 10)).unwrap();

        let err = registry.register(5, prefix(b"AB", 20)).unwrap_err();
        assert_eq!(err, Error::DuplicateRegistration { level: 5 });

        registry.enable_detection();
        assert_eq!(registry.detect(b"AB", "udp", 1, 2), Ok(LayerType(10)));
    }

    #[test]
    fn test_invalid_priority() {
        let mut registry = DetectorRegistry::new();
        let err = registry.register(MAX_DETECTORS, prefix(b"A", 1)).unwrap_err();
        assert_eq!(err, Error::InvalidPriority { level: 128, max: 127 });
        assert_eq!(registry.registered_levels().count(), 0);
    }

    #[test]
    fn test_slot_order_not_registration_order() {
        let mut registry = DetectorRegistry::new();
        registry.register(90, prefix(b"A", 90)).unwrap();
        registry.register(10, prefix(b"A", 10)).unwrap();
        registry.register(50, prefix(b"A", 50)).unwrap();
        registry.enable_detection();

        assert_eq!(registry.detect(b"AAAA", "udp", 1, 2), Ok(LayerType(10)));
        assert_eq!(registry.registered_levels().collect::<Vec<_>>(), vec![10, 50, 90]);
    }

    #[test]
    fn test_falls_through_to_later_levels() {
        let mut registry = DetectorRegistry::new();
        registry.register(0, prefix(b"XY", 1)).unwrap();
        registry
            .register(
                3,
                Box::new(PortDetector {
                    port: 4433,
                    layer_type: LayerType(2),
                }),
            )
            .unwrap();
        registry.enable_detection();

        assert_eq!(registry.detect(b"zz", "udp", 1, 4433), Ok(LayerType(2)));
        assert_eq!(registry.detect(b"zz", "tcp", 1, 4433), Err(Error::NoMatch));
    }

    #[test]
    fn test_detect_transport_passes_protocol_and_ports() {
        let mut registry = DetectorRegistry::new();
        registry
            .register(
                0,
                Box::new(PortDetector {
                    port: 4433,
                    layer_type: LayerType(2),
                }),
            )
            .unwrap();

        let udp = Transport {
            kind: LayerType::UDP,
            src: 50000,
            dst: 4433,
        };
        assert!(!registry.is_enabled());
        assert_eq!(
            registry.detect_transport(b"zz", &udp),
            Err(Error::HeuristicsDisabled)
        );

        registry.enable_detection();
        assert!(registry.is_enabled());
        assert_eq!(registry.detect_transport(b"zz", &udp), Ok(LayerType(2)));

        let tcp = Transport {
            kind: LayerType::TCP,
            ..udp
        };
        assert_eq!(registry.detect_transport(b"zz", &tcp), Err(Error::NoMatch));

        // Source and destination must not be swapped on the way through.
        let reversed = Transport {
            kind: LayerType::UDP,
            src: 4433,
            dst: 50000,
        };
        assert_eq!(
            registry.detect_transport(b"zz", &reversed),
            Err(Error::NoMatch)
        );
    }

    #[test]
    fn test_no_match_and_empty_registry() {
        let mut registry = DetectorRegistry::new();
        registry.enable_detection();
        assert_eq!(registry.detect(b"", "udp", 0, 0), Err(Error::NoMatch));
    }

    #[test]
    fn test_builtin_plus_detector() {
        let mut registry = DetectorRegistry::with_builtin();
        assert!(registry.is_registered(PLUS_DETECTOR_LEVEL));
        assert!(matches!(
            registry.register(PLUS_DETECTOR_LEVEL, prefix(b"A", 1)),
            Err(Error::DuplicateRegistration { .. })
        ));

        registry.enable_detection();
        let plus = [0xD8, 0x00, 0x7F, 0xF5];
        assert_eq!(registry.detect(&plus, "udp", 1, 2), Ok(LayerType::PLUS));
        assert_eq!(registry.detect(&plus[..3], "udp", 1, 2), Err(Error::NoMatch));

        // A higher priority detector shadows the built-in one.
        registry.register(0, prefix(&[0xD8], 77)).unwrap();
        assert_eq!(registry.detect(&plus, "udp", 1, 2), Ok(LayerType(77)));
    }

    #[test]
    fn test_shared_across_threads() {
        let mut registry = DetectorRegistry::with_builtin();
        registry.enable_detection();
        let registry = std::sync::Arc::new(registry);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.detect(&[0xD8, 0x00, 0x7F, 0xF0], "udp", 1, 2))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(LayerType::PLUS));
        }
    }
}
