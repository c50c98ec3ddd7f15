//! SNMP message decoding and the per-endpoint response cache.
//!
//! Decoding walks the buffer with a [`Span`] (offset plus remaining length)
//! that is passed and returned by value. Every component is checked against
//! the length declared by its parent before it is read, so a hostile
//! datagram can at worst produce a [`ResponseError`].
//!
//! A response is decoded completely before anything is merged into the
//! cache; a failure at any point leaves the cache untouched.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    ber::{self, DecodeError},
    message::{Pdu, VarBind, VarBindValue},
    oid::Oid,
};

/// Errors that classify a rejected response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Unexpected tag 0x{found:02x}, expected 0x{expected:02x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("Message carries no PDU with tag 0x{0:02x}")]
    MissingPdu(u8),
    #[error("Agent reported error-status {status} (error-index {index})")]
    ErrorStatus { status: i64, index: i64 },
    #[error("Malformed message: {0}")]
    Malformed(#[from] DecodeError),
}

/// A window into the buffer being decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    fn whole(buf: &[u8]) -> Self {
        Span {
            offset: 0,
            len: buf.len(),
        }
    }

    fn end(self) -> usize {
        self.offset + self.len
    }

    fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// One TLV read from a span, and what is left of the span after it.
#[derive(Clone, Copy, Debug)]
struct Tlv {
    tag: u8,
    content: Span,
    rest: Span,
}

fn read_tlv(buf: &[u8], within: Span) -> Result<Tlv, DecodeError> {
    if within.len < 2 {
        return Err(DecodeError::Truncated {
            needed: 2,
            available: within.len,
        });
    }
    let tag = buf[within.offset];
    let (len, consumed) = ber::decode_length(&buf[within.offset + 1..within.end()])?;

    let header = 1 + consumed;
    let available = within.len - header;
    if len > available {
        return Err(DecodeError::LengthExceedsBuffer {
            length: len,
            available,
        });
    }

    Ok(Tlv {
        tag,
        content: Span {
            offset: within.offset + header,
            len,
        },
        rest: Span {
            offset: within.offset + header + len,
            len: available - len,
        },
    })
}

fn expect_tlv(buf: &[u8], within: Span, expected: u8) -> Result<(Span, Span), ResponseError> {
    let tlv = read_tlv(buf, within)?;
    if tlv.tag != expected {
        return Err(ResponseError::UnexpectedTag {
            expected,
            found: tlv.tag,
        });
    }
    Ok((tlv.content, tlv.rest))
}

fn read_integer(buf: &[u8], within: Span) -> Result<(i64, Span), ResponseError> {
    let (content, rest) = expect_tlv(buf, within, ber::TAG_INTEGER)?;
    let value = ber::decode_integer(&buf[content.offset..content.end()])?;
    Ok((value, rest))
}

fn read_varbind(buf: &[u8], within: Span) -> Result<VarBind, ResponseError> {
    let (oid_content, rest) = expect_tlv(buf, within, ber::TAG_OBJECT_IDENTIFIER)?;
    let oid = Oid::decode_content(&buf[oid_content.offset..oid_content.end()])?;

    let value = read_tlv(buf, rest)?;
    let value = VarBindValue::decode(value.tag, &buf[value.content.offset..value.content.end()])?;

    Ok(VarBind { oid, value })
}

fn read_pdu(buf: &[u8], tag: u8, within: Span) -> Result<Pdu, ResponseError> {
    let (request_id, rest) = read_integer(buf, within)?;
    let (error_status, rest) = read_integer(buf, rest)?;
    let (error_index, rest) = read_integer(buf, rest)?;

    let (mut list, _) = expect_tlv(buf, rest, ber::TAG_SEQUENCE)?;
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let (entry, next) = expect_tlv(buf, list, ber::TAG_SEQUENCE)?;
        varbinds.push(read_varbind(buf, entry)?);
        list = next;
    }

    Ok(Pdu {
        tag,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

/// A decoded SNMP message.
///
/// Version and community are reported when they precede the PDU as RFC 1157
/// lays out; other top-level components are skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub version: Option<i64>,
    pub community: Option<Vec<u8>>,
    pub pdu: Pdu,
}

/// Decodes a complete SNMP message, looking for the PDU tagged `pdu_tag`.
///
/// # Errors
/// [`ResponseError::UnexpectedTag`] when the buffer is not a SEQUENCE,
/// [`ResponseError::MissingPdu`] when no top-level component carries `pdu_tag`,
/// [`ResponseError::Malformed`] on any length or content violation.
pub fn decode_message(buf: &[u8], pdu_tag: u8) -> Result<ReceivedMessage, ResponseError> {
    match buf.first() {
        None => {
            return Err(DecodeError::Truncated {
                needed: 2,
                available: 0,
            }
            .into())
        }
        Some(&tag) if tag != ber::TAG_SEQUENCE => {
            return Err(ResponseError::UnexpectedTag {
                expected: ber::TAG_SEQUENCE,
                found: tag,
            })
        }
        Some(_) => {}
    }

    let (mut cursor, _) = expect_tlv(buf, Span::whole(buf), ber::TAG_SEQUENCE)?;
    let mut version = None;
    let mut community = None;

    while !cursor.is_empty() {
        let tlv = read_tlv(buf, cursor)?;
        let content = &buf[tlv.content.offset..tlv.content.end()];
        match tlv.tag {
            t if t == pdu_tag => {
                let pdu = read_pdu(buf, t, tlv.content)?;
                return Ok(ReceivedMessage {
                    version,
                    community,
                    pdu,
                });
            }
            ber::TAG_INTEGER if version.is_none() && community.is_none() => {
                version = Some(ber::decode_integer(content)?);
            }
            ber::TAG_OCTET_STRING if community.is_none() => {
                community = Some(content.to_vec());
            }
            other => log::trace!("Skipping top-level component with tag 0x{:02x}", other),
        }
        cursor = tlv.rest;
    }

    Err(ResponseError::MissingPdu(pdu_tag))
}

/// Decodes a GetResponse and checks its error-status.
///
/// # Errors
/// Everything [`decode_message`] reports, plus [`ResponseError::ErrorStatus`]
/// when the agent flagged an error.
pub fn parse_response(buf: &[u8]) -> Result<Pdu, ResponseError> {
    let pdu = decode_message(buf, ber::TAG_GET_RESPONSE)?.pdu;
    ensure_success(&pdu)?;
    Ok(pdu)
}

/// Fails with [`ResponseError::ErrorStatus`] when the agent flagged an error.
pub fn ensure_success(pdu: &Pdu) -> Result<(), ResponseError> {
    if pdu.error_status != 0 {
        return Err(ResponseError::ErrorStatus {
            status: pdu.error_status,
            index: pdu.error_index,
        });
    }
    Ok(())
}

/// A named field polled from every endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub oid: Oid,
}

/// Outcome of merging one response into a cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Fields that received a new value.
    pub updated: usize,
    /// Varbinds whose OID is not a registered field.
    pub unmatched: usize,
    /// Varbinds for fields already updated this cycle.
    pub duplicate: usize,
    /// Varbinds carrying a non-numeric value.
    pub non_numeric: usize,
}

/// Last known value of every field of one endpoint.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    fields: Vec<Field>,
    by_oid: HashMap<Oid, usize>,
    values: Vec<Option<i64>>,
    fresh: Vec<bool>,
}

impl ResponseCache {
    /// Creates a cache with every field set to "no data yet".
    pub fn new(fields: Vec<Field>) -> Self {
        let by_oid = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.oid.clone(), i))
            .collect();
        let count = fields.len();
        ResponseCache {
            fields,
            by_oid,
            values: vec![None; count],
            fresh: vec![false; count],
        }
    }

    /// Registered fields, in registration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Values in registration order.
    pub fn values(&self) -> &[Option<i64>] {
        &self.values
    }

    /// Last value of the field called `name`.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.values[i])
    }

    /// Starts a poll cycle: every field may be updated once again.
    pub fn begin_cycle(&mut self) {
        self.fresh.iter_mut().for_each(|f| *f = false);
    }

    /// Stores the numeric values of `pdu` under their field names.
    pub fn merge(&mut self, pdu: &Pdu) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for vb in &pdu.varbinds {
            let Some(&index) = self.by_oid.get(&vb.oid) else {
                log::debug!("Ignoring unregistered OID {}", vb.oid);
                summary.unmatched += 1;
                continue;
            };
            if self.fresh[index] {
                log::debug!("Ignoring repeated value for {} this cycle", vb.oid);
                summary.duplicate += 1;
                continue;
            }
            match vb.value.as_integer() {
                Some(value) => {
                    self.values[index] = Some(value);
                    self.fresh[index] = true;
                    summary.updated += 1;
                }
                None => {
                    log::debug!(
                        "No numeric value for {} (tag 0x{:02x}), keeping previous",
                        vb.oid,
                        vb.value.tag()
                    );
                    summary.non_numeric += 1;
                }
            }
        }

        summary
    }

    /// Parses a GetResponse and merges it; the cache is untouched on error.
    ///
    /// # Errors
    /// See [`parse_response`].
    pub fn parse_and_merge(&mut self, buf: &[u8]) -> Result<MergeSummary, ResponseError> {
        let pdu = parse_response(buf)?;
        Ok(self.merge(&pdu))
    }
}
