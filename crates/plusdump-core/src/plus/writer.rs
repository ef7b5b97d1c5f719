//! PLUS packet serialization.
//!
//! [`write_basic_packet`] and [`write_extended_packet`] turn plain field
//! values into a freshly allocated byte vector. [`SerializeBuffer`] is the
//! sink abstraction the framework hands to a layer so it can prepend its
//! header in front of the layers already serialized.

use super::wire::{self, BASIC_HEADER_LEN, PCF_TYPE_ESCAPE};
use super::{FLAG_L, FLAG_R, FLAG_S, FLAG_X, PLUS_MAGIC};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes};

/// Headroom a [`PacketBuffer`] reserves when it has to grow at the front
const DEFAULT_HEADROOM: usize = 64;

/// Fields shared by basic and extended packets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicFields {
    /// L flag
    pub l_flag: bool,
    /// R flag
    pub r_flag: bool,
    /// S flag
    pub s_flag: bool,
    /// Connection/Association Token
    pub cat: u64,
    /// Packet Sequence Number
    pub psn: u32,
    /// Packet Sequence Echo
    pub pse: u32,
}

/// Packet connection field of an extended packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PcfFields<'a> {
    /// PCF type, `None` writes the escape marker and nothing else
    pub pcf_type: Option<u16>,
    /// Integrity tag (2 bits)
    pub integrity: u8,
    /// PCF value (at most 63 bytes)
    pub value: &'a [u8],
}

/// Allocate an output vector, reporting allocation failure as an error
fn allocate(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reserve(&mut buf, len)?;
    Ok(buf)
}

/// Reserve room for `additional` more bytes in `buf`, leaving it untouched on failure
fn reserve(buf: &mut Vec<u8>, additional: usize) -> Result<()> {
    buf.try_reserve(additional)
        .map_err(|e| Error::encoding(format!("cannot allocate {} bytes: {}", additional, e)))
}

fn put_fixed(buf: &mut Vec<u8>, fields: &BasicFields, extended: bool) {
    let mut flags = 0u32;
    if fields.l_flag {
        flags |= FLAG_L as u32;
    }
    if fields.r_flag {
        flags |= FLAG_R as u32;
    }
    if fields.s_flag {
        flags |= FLAG_S as u32;
    }
    if extended {
        flags |= FLAG_X as u32;
    }

    buf.put_u32((PLUS_MAGIC << 4) | flags);
    buf.put_u64(fields.cat);
    buf.put_u32(fields.psn);
    buf.put_u32(fields.pse);
}

/// Serialize a packet without packet connection field
pub fn write_basic_packet(fields: &BasicFields, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = allocate(BASIC_HEADER_LEN + payload.len())?;
    put_fixed(&mut buf, fields, false);
    buf.put_slice(payload);
    Ok(buf)
}

/// Serialize a packet carrying a packet connection field
pub fn write_extended_packet(
    fields: &BasicFields,
    pcf: &PcfFields<'_>,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let Some(pcf_type) = pcf.pcf_type else {
        if !pcf.value.is_empty() {
            return Err(Error::invalid_pcf("PCF value present without a PCF type"));
        }
        let mut buf = allocate(BASIC_HEADER_LEN + 1 + payload.len())?;
        put_fixed(&mut buf, fields, true);
        buf.put_u8(PCF_TYPE_ESCAPE as u8);
        buf.put_slice(payload);
        return Ok(buf);
    };

    if pcf_type == PCF_TYPE_ESCAPE {
        return Err(Error::invalid_pcf(
            "PCF type 0xff is reserved for the escape marker",
        ));
    }
    let len_integrity = wire::join_len_integrity(pcf.value.len(), pcf.integrity)?;

    let mut buf = allocate(BASIC_HEADER_LEN + 3 + pcf.value.len() + payload.len())?;
    put_fixed(&mut buf, fields, true);
    wire::put_pcf_type(&mut buf, pcf_type)?;
    buf.put_u8(len_integrity);
    buf.put_slice(pcf.value);
    buf.put_slice(payload);
    Ok(buf)
}

/// Output sink a layer serializes into
///
/// Layers are serialized innermost first, so each one prepends its bytes.
pub trait SerializeBuffer {
    /// The bytes serialized so far
    fn bytes(&self) -> &[u8];

    /// Make room for `n` bytes in front of the current contents
    fn prepend_bytes(&mut self, n: usize) -> Result<&mut [u8]>;

    /// Make room for `n` bytes after the current contents
    fn append_bytes(&mut self, n: usize) -> Result<&mut [u8]>;

    /// Drop all contents
    fn clear(&mut self);
}

/// Growable [`SerializeBuffer`]
///
/// Keeps spare room at the front so repeated prepends do not shift the
/// contents every time. An optional maximum length, as well as a failed
/// allocation, turns oversize output into [`Error::EncodingFailure`] and
/// leaves the buffer as it was.
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
    start: usize,
    max_len: Option<usize>,
}

impl PacketBuffer {
    /// Creates an empty, unbounded buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer that refuses to grow beyond `max_len` bytes
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    /// Number of serialized bytes
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    /// Returns true when nothing was serialized yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the buffer, returning the serialized bytes
    pub fn freeze(self) -> Bytes {
        Bytes::from(self.data).slice(self.start..)
    }

    fn check_room(&self, n: usize) -> Result<()> {
        let wanted = self
            .len()
            .checked_add(n)
            .ok_or_else(|| Error::encoding("buffer length overflow"))?;
        match self.max_len {
            Some(max) if wanted > max => Err(Error::encoding(format!(
                "{} bytes requested, buffer is limited to {}",
                wanted, max
            ))),
            _ => Ok(()),
        }
    }
}

impl SerializeBuffer for PacketBuffer {
    fn bytes(&self) -> &[u8] {
        &self.data[self.start..]
    }

    fn prepend_bytes(&mut self, n: usize) -> Result<&mut [u8]> {
        self.check_room(n)?;

        if self.start < n {
            let headroom = n
                .checked_add(DEFAULT_HEADROOM)
                .ok_or_else(|| Error::encoding("buffer length overflow"))?;
            let total = headroom
                .checked_add(self.len())
                .ok_or_else(|| Error::encoding("buffer length overflow"))?;

            let mut grown = Vec::new();
            reserve(&mut grown, total)?;
            grown.resize(headroom, 0);
            grown.extend_from_slice(&self.data[self.start..]);
            self.data = grown;
            self.start = headroom;
        }

        self.start -= n;
        Ok(&mut self.data[self.start..self.start + n])
    }

    fn append_bytes(&mut self, n: usize) -> Result<&mut [u8]> {
        self.check_room(n)?;

        reserve(&mut self.data, n)?;
        let end = self.data.len();
        self.data.resize(end + n, 0);
        Ok(&mut self.data[end..])
    }

    fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }
}
