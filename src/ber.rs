//! BER (Basic Encoding Rules) primitives used by the SNMPv1 codec.
//!
//! Every SNMP structure is a TLV triple: one tag octet, a length field and
//! `length` octets of content.
//!
//! # Length Field (X.690 Section 8.1.3)
//!
//! ```text
//! short form (0..=127):   +-+-+-+-+-+-+-+-+
//!                         |0|   length    |
//!                         +-+-+-+-+-+-+-+-+
//!
//! long form (>= 128):     +-+-+-+-+-+-+-+-+-----------------------+
//!                         |1|  B (octets) | B octets, big-endian  |
//!                         +-+-+-+-+-+-+-+-+-----------------------+
//! ```
//!
//! # OID Sub-identifier (X.690 Section 8.19.2)
//!
//! Base-128 big-endian groups, every octet except the last has bit 8 set:
//!
//! ```text
//! 128 = 0b1000_0000  ->  0x81 0x00
//! ```

use std::fmt;

use thiserror::Error;

/// INTEGER tag.
pub const TAG_INTEGER: u8 = 0x02;
/// OCTET STRING tag.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// NULL tag.
pub const TAG_NULL: u8 = 0x05;
/// OBJECT IDENTIFIER tag.
pub const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
/// SEQUENCE (constructed) tag.
pub const TAG_SEQUENCE: u8 = 0x30;
/// SNMP application type Counter32 (RFC 1155 / RFC 2578).
pub const TAG_COUNTER32: u8 = 0x41;
/// SNMP application type Gauge32.
pub const TAG_GAUGE32: u8 = 0x42;
/// SNMP application type TimeTicks.
pub const TAG_TIMETICKS: u8 = 0x43;
/// SNMP application type Counter64.
pub const TAG_COUNTER64: u8 = 0x46;
/// GetRequest-PDU context tag.
pub const TAG_GET_REQUEST: u8 = 0xA0;
/// GetResponse-PDU context tag.
pub const TAG_GET_RESPONSE: u8 = 0xA2;

/// Largest number of length octets accepted in long form.
const MAX_LENGTH_OCTETS: usize = std::mem::size_of::<usize>();

/// Largest INTEGER content accepted (fits an `i64`/`u64`).
const MAX_INTEGER_OCTETS: usize = 8;

/// Errors raised while decoding BER fields out of an untrusted buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the field was complete.
    #[error("Truncated input: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Indefinite length form (0x80) is not allowed in SNMP.
    #[error("Indefinite length form is not supported")]
    IndefiniteLength,

    /// Long form length declares more octets than fit in a `usize`.
    #[error("Length field uses {0} octets, maximum is {MAX_LENGTH_OCTETS}")]
    LengthTooLong(usize),

    /// A component declares more content than its container holds.
    #[error("Declared length {length} exceeds remaining {available} bytes")]
    LengthExceedsBuffer { length: usize, available: usize },

    /// OID sub-identifier does not fit in 32 bits.
    #[error("OID sub-identifier overflows 32 bits")]
    OidComponentOverflow,

    /// INTEGER content is empty or wider than 64 bits.
    #[error("INTEGER content of {0} octets is not supported")]
    IntegerTooLong(usize),

    /// OBJECT IDENTIFIER content is empty.
    #[error("Empty OBJECT IDENTIFIER")]
    InvalidOid,
}

/// Encodes a length field in its minimal form.
#[must_use]
pub fn encode_length(n: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_length_size(n));
    write_length(&mut buf, n);
    buf
}

/// Appends the minimal encoding of `n` to `buf`.
pub fn write_length(buf: &mut Vec<u8>, n: usize) {
    if n <= 0x7F {
        buf.push(n as u8);
        return;
    }
    let octets = encoded_length_size(n) - 1;
    buf.push(0x80 | octets as u8);
    for i in (0..octets).rev() {
        buf.push((n >> (8 * i)) as u8);
    }
}

/// Number of bytes `encode_length(n)` produces, without allocating.
#[must_use]
pub fn encoded_length_size(n: usize) -> usize {
    if n <= 0x7F {
        return 1;
    }
    let significant_bits = usize::BITS - n.leading_zeros();
    1 + significant_bits.div_ceil(8) as usize
}

/// Decodes a length field, returning `(length, bytes_consumed)`.
///
/// # Errors
/// Fails on truncated input, the indefinite form, or more length octets than a `usize` holds.
pub fn decode_length(buf: &[u8]) -> Result<(usize, usize), DecodeError> {
    let first = *buf.first().ok_or(DecodeError::Truncated {
        needed: 1,
        available: 0,
    })?;

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let octets = (first & 0x7F) as usize;
    if octets == 0 {
        return Err(DecodeError::IndefiniteLength);
    }
    if octets > MAX_LENGTH_OCTETS {
        return Err(DecodeError::LengthTooLong(octets));
    }
    if buf.len() < 1 + octets {
        return Err(DecodeError::Truncated {
            needed: 1 + octets,
            available: buf.len(),
        });
    }

    let n = buf[1..=octets]
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok((n, 1 + octets))
}

/// Encodes one OID sub-identifier as base-128 groups.
#[must_use]
pub fn encode_oid_component(v: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(oid_component_size(v));
    write_oid_component(&mut buf, v);
    buf
}

/// Appends the base-128 encoding of `v` to `buf`.
pub fn write_oid_component(buf: &mut Vec<u8>, v: u32) {
    let groups = oid_component_size(v);
    for i in (0..groups).rev() {
        let group = ((v >> (7 * i)) & 0x7F) as u8;
        if i == 0 {
            buf.push(group);
        } else {
            buf.push(group | 0x80);
        }
    }
}

/// Number of bytes `encode_oid_component(v)` produces.
#[must_use]
pub fn oid_component_size(v: u32) -> usize {
    if v == 0 {
        return 1;
    }
    let significant_bits = u32::BITS - v.leading_zeros();
    significant_bits.div_ceil(7) as usize
}

/// Decodes one OID sub-identifier, returning `(value, bytes_consumed)`.
///
/// # Errors
/// Fails when the last available byte still has the continuation bit set, or
/// when the value does not fit in 32 bits.
pub fn decode_oid_component(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value: u32 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if value > (u32::MAX >> 7) {
            return Err(DecodeError::OidComponentOverflow);
        }
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(DecodeError::Truncated {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

/// Number of content octets for a minimal two's-complement INTEGER.
#[must_use]
pub fn integer_size(v: i64) -> usize {
    let mut size = MAX_INTEGER_OCTETS;
    while size > 1 {
        let top = (v >> (8 * (size - 1))) as u8;
        let next_sign = (v >> (8 * (size - 1) - 1)) & 1;
        // A leading octet is redundant when it only repeats the sign of the next one.
        if (top == 0x00 && next_sign == 0) || (top == 0xFF && next_sign == 1) {
            size -= 1;
        } else {
            break;
        }
    }
    size
}

/// Appends the minimal two's-complement content octets of `v` (no tag or length).
pub fn write_integer_content(buf: &mut Vec<u8>, v: i64) {
    let size = integer_size(v);
    buf.extend_from_slice(&v.to_be_bytes()[MAX_INTEGER_OCTETS - size..]);
}

/// Number of content octets for an unsigned application value (Counter32, Gauge32...).
#[must_use]
pub fn unsigned_size(v: u64) -> usize {
    let significant_bits = u64::BITS - v.leading_zeros();
    // One extra bit keeps the value positive in two's complement.
    ((significant_bits + 1).div_ceil(8) as usize).max(1)
}

/// Appends the content octets of an unsigned value, with a leading zero when the top bit is set.
pub fn write_unsigned_content(buf: &mut Vec<u8>, v: u64) {
    let size = unsigned_size(v);
    if size > MAX_INTEGER_OCTETS {
        buf.push(0);
        buf.extend_from_slice(&v.to_be_bytes());
    } else {
        buf.extend_from_slice(&v.to_be_bytes()[MAX_INTEGER_OCTETS - size..]);
    }
}

/// Decodes INTEGER content octets as a signed two's-complement value.
///
/// # Errors
/// Fails on empty content or more than 8 octets.
pub fn decode_integer(content: &[u8]) -> Result<i64, DecodeError> {
    if content.is_empty() || content.len() > MAX_INTEGER_OCTETS {
        return Err(DecodeError::IntegerTooLong(content.len()));
    }
    let seed: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(seed, |acc, &b| (acc << 8) | b as i64))
}

/// Decodes unsigned application-type content octets (a leading zero octet is allowed).
///
/// # Errors
/// Fails on empty content or values wider than 64 bits.
pub fn decode_unsigned(content: &[u8]) -> Result<u64, DecodeError> {
    let digits = match content {
        [] => return Err(DecodeError::IntegerTooLong(0)),
        [0, rest @ ..] if !rest.is_empty() => rest,
        _ => content,
    };
    if digits.len() > MAX_INTEGER_OCTETS {
        return Err(DecodeError::IntegerTooLong(content.len()));
    }
    Ok(digits.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Size of a complete TLV with `content_len` content octets.
#[must_use]
pub fn tlv_size(content_len: usize) -> usize {
    1 + encoded_length_size(content_len) + content_len
}

/// Appends a tag and length header.
pub fn write_header(buf: &mut Vec<u8>, tag: u8, content_len: usize) {
    buf.push(tag);
    write_length(buf, content_len);
}

/// Hex dump of a byte buffer for trace logging.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
