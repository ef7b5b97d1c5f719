//! PLUS (Path Layer UDP Substrate) header codec.
//!
//! [`PlusHeader::decode`] parses a header out of a captured buffer without
//! copying: `contents`, `payload` and `pcf_value` borrow from the input, so
//! the header cannot outlive it. [`PlusHeader::encode`] goes the other way
//! and always produces freshly owned bytes.
//!
//! ## Header forms
//!
//! - **Basic** (X flag clear): 20 bytes of magic, flags, CAT, PSN and PSE.
//! - **Extended** (X flag set): the basic header followed by a packet
//!   connection field (PCF). A PCF type of `0xFF` is an escape that ends
//!   the header immediately.
//!
//! ```
//! use plusdump_core::PlusHeader;
//!
//! let packet = [
//!     0xD8, 0x00, 0x7F, 0xF8, // magic, L flag
//!     0, 0, 0, 0, 0, 0, 0, 7, // CAT
//!     0, 0, 0, 1, // PSN
//!     0, 0, 0, 0, // PSE
//!     0xCA, 0xFE, // payload
//! ];
//!
//! let header = PlusHeader::decode(&packet)?;
//! assert!(header.l_flag);
//! assert_eq!(header.cat, 7);
//! assert_eq!(header.payload, &[0xCA, 0xFE]);
//! assert_eq!(header.encode()?, packet);
//! # Ok::<(), plusdump_core::Error>(())
//! ```

mod wire;
mod writer;

use crate::detect::Detector;
use crate::error::{Error, Result};
use crate::layer::{Layer, LayerType, PacketBuilder};
use bytes::Bytes;
use tracing::trace;

pub use wire::{
    join_len_integrity, put_pcf_type, read_pcf_type, split_len_integrity, BASIC_HEADER_LEN,
    MAX_PCF_INTEGRITY, MAX_PCF_LEN, PCF_TYPE_ESCAPE,
};
pub use writer::{
    write_basic_packet, write_extended_packet, BasicFields, PacketBuffer, PcfFields,
    SerializeBuffer,
};

/// The 28-bit pattern identifying a PLUS header
pub const PLUS_MAGIC: u32 = 0x0D80_07FF;

/// X flag: a packet connection field follows the basic header
pub const FLAG_X: u8 = 0x01;
/// S flag
pub const FLAG_S: u8 = 0x02;
/// R flag
pub const FLAG_R: u8 = 0x04;
/// L flag
pub const FLAG_L: u8 = 0x08;

/// Returns true if `payload` starts with the PLUS magic, whatever the flags
pub fn has_plus_magic(payload: &[u8]) -> bool {
    match wire::read_u32(payload, 0) {
        Ok(word) => word >> 4 == PLUS_MAGIC,
        Err(_) => false,
    }
}

/// Configuration for header decoding
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Reject headers whose magic is not [`PLUS_MAGIC`]
    pub verify_magic: bool,
}

impl DecoderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the magic pattern is checked
    pub fn verify_magic(mut self, verify: bool) -> Self {
        self.verify_magic = verify;
        self
    }
}

/// One PLUS header
///
/// PCF fields are `None` for basic headers. For an escaped extended header
/// only the flags and fixed fields are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlusHeader<'a> {
    /// S flag
    pub s_flag: bool,
    /// R flag
    pub r_flag: bool,
    /// L flag
    pub l_flag: bool,
    /// X flag (extended header)
    pub x_flag: bool,
    /// 28-bit magic as found on the wire; ignored when encoding
    pub magic: u32,
    /// Connection/Association Token
    pub cat: u64,
    /// Packet Sequence Number
    pub psn: u32,
    /// Packet Sequence Echo
    pub pse: u32,
    /// PCF type
    pub pcf_type: Option<u16>,
    /// PCF value length in bytes
    pub pcf_len: Option<u8>,
    /// PCF integrity tag
    pub pcf_integrity: Option<u8>,
    /// PCF value
    pub pcf_value: Option<&'a [u8]>,
    /// Header bytes consumed by decoding
    pub contents: &'a [u8],
    /// Bytes following the header
    pub payload: &'a [u8],
}

impl<'a> PlusHeader<'a> {
    /// Creates a basic header with the given flow identity
    pub fn new(cat: u64, psn: u32, pse: u32) -> Self {
        Self {
            magic: PLUS_MAGIC,
            cat,
            psn,
            pse,
            ..Self::default()
        }
    }

    /// Sets the L, R and S flags
    pub fn with_flags(mut self, l_flag: bool, r_flag: bool, s_flag: bool) -> Self {
        self.l_flag = l_flag;
        self.r_flag = r_flag;
        self.s_flag = s_flag;
        self
    }

    /// Attaches a packet connection field, making this an extended header
    pub fn with_pcf(mut self, pcf_type: u16, integrity: u8, value: &'a [u8]) -> Self {
        self.x_flag = true;
        self.pcf_type = Some(pcf_type);
        self.pcf_len = u8::try_from(value.len()).ok();
        self.pcf_integrity = Some(integrity);
        self.pcf_value = Some(value);
        self
    }

    /// Makes this an extended header that carries only the escape marker
    pub fn with_escape(mut self) -> Self {
        self.x_flag = true;
        self.pcf_type = None;
        self.pcf_len = None;
        self.pcf_integrity = None;
        self.pcf_value = None;
        self
    }

    /// Sets the payload carried after the header
    pub fn with_payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    /// Decodes a header from `data` with the default configuration
    pub fn decode(data: &'a [u8]) -> Result<Self> {
        Self::decode_with_config(data, &DecoderConfig::default())
    }

    /// Decodes a header from `data`
    ///
    /// Nothing is returned on error; a header is either complete or absent.
    pub fn decode_with_config(data: &'a [u8], config: &DecoderConfig) -> Result<Self> {
        let magic_and_flags = wire::read_u32(data, 0)?;
        let magic = magic_and_flags >> 4;
        if config.verify_magic && magic != PLUS_MAGIC {
            return Err(Error::InvalidMagic { found: magic });
        }

        let flags = (magic_and_flags & 0x0F) as u8;
        let mut header = PlusHeader {
            x_flag: flags & FLAG_X != 0,
            s_flag: flags & FLAG_S != 0,
            r_flag: flags & FLAG_R != 0,
            l_flag: flags & FLAG_L != 0,
            magic,
            cat: wire::read_u64(data, 4)?,
            psn: wire::read_u32(data, 12)?,
            pse: wire::read_u32(data, 16)?,
            ..PlusHeader::default()
        };

        if !header.x_flag {
            header.contents = &data[..BASIC_HEADER_LEN];
            header.payload = &data[BASIC_HEADER_LEN..];
            return Ok(header);
        }

        let (pcf_type, type_len) = wire::read_pcf_type(data, BASIC_HEADER_LEN)?;
        let mut index = BASIC_HEADER_LEN + type_len;

        if pcf_type == PCF_TYPE_ESCAPE {
            header.contents = &data[..index];
            header.payload = &data[index..];
            return Ok(header);
        }

        let (pcf_len, pcf_integrity) = wire::split_len_integrity(wire::read_u8(data, index)?);
        index += 1;

        let pcf_value = wire::read_slice(data, index, pcf_len)?;
        index += pcf_len;

        header.pcf_type = Some(pcf_type);
        header.pcf_len = Some(pcf_len as u8);
        header.pcf_integrity = Some(pcf_integrity);
        header.pcf_value = Some(pcf_value);
        header.contents = &data[..index];
        header.payload = &data[index..];
        Ok(header)
    }

    fn basic_fields(&self) -> BasicFields {
        BasicFields {
            l_flag: self.l_flag,
            r_flag: self.r_flag,
            s_flag: self.s_flag,
            cat: self.cat,
            psn: self.psn,
            pse: self.pse,
        }
    }

    /// Serializes the header followed by its payload
    ///
    /// The magic is always written as [`PLUS_MAGIC`]; the `magic` field is
    /// not consulted.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.x_flag {
            return write_basic_packet(&self.basic_fields(), self.payload);
        }

        let value = self.pcf_value.unwrap_or_default();
        if let (Some(_), Some(len)) = (self.pcf_type, self.pcf_len) {
            if usize::from(len) != value.len() {
                return Err(Error::invalid_pcf(format!(
                    "PCF length {} does not match a {} byte value",
                    len,
                    value.len()
                )));
            }
        }

        let pcf = PcfFields {
            pcf_type: self.pcf_type,
            integrity: self.pcf_integrity.unwrap_or_default(),
            value,
        };
        write_extended_packet(&self.basic_fields(), &pcf, self.payload)
    }

    /// Serializes the header into an immutable [`Bytes`]
    pub fn to_bytes(&self) -> Result<Bytes> {
        self.encode().map(Bytes::from)
    }

    /// Prepends the serialized header and payload to `buf`
    pub fn serialize_to(&self, buf: &mut dyn SerializeBuffer) -> Result<()> {
        let encoded = self.encode()?;
        buf.prepend_bytes(encoded.len())?.copy_from_slice(&encoded);
        Ok(())
    }

    /// Length of the header on the wire, without payload
    pub fn header_len(&self) -> usize {
        self.contents.len()
    }
}

impl Layer for PlusHeader<'_> {
    fn layer_type(&self) -> LayerType {
        LayerType::PLUS
    }

    fn contents(&self) -> &[u8] {
        self.contents
    }

    fn payload(&self) -> &[u8] {
        self.payload
    }
}

/// Decode entry point registered with the packet decoding framework
///
/// On success the header is added to `builder`. When the previous layer is
/// a transport layer, decoding continues with the layer type its ports map
/// to, destination port first.
pub fn decode_plus<'a>(data: &'a [u8], builder: &mut dyn PacketBuilder<'a>) -> Result<()> {
    let header = PlusHeader::decode(data)?;
    let next = builder
        .last_transport()
        .map(|transport| transport.next_layer_type());

    trace!(
        "Decoded PLUS header: cat={:#018x} psn={} pse={} ({} header bytes)",
        header.cat,
        header.psn,
        header.pse,
        header.header_len()
    );
    builder.add_layer(Box::new(header));

    match next {
        Some(layer_type) => builder.next_decoder(layer_type),
        None => Ok(()),
    }
}

/// Heuristic detector recognising PLUS by its magic, regardless of ports
#[derive(Debug, Clone, Copy, Default)]
pub struct PlusDetector;

impl Detector for PlusDetector {
    fn test(&self, payload: &[u8], _proto: &str, _src_port: u16, _dst_port: u16) -> bool {
        has_plus_magic(payload)
    }

    fn layer_type(&self) -> LayerType {
        LayerType::PLUS
    }
}
