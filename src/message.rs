//! SNMPv1 message model and encoder (RFC 1157 Section 4).
//!
//! ```text
//! Message    ::= SEQUENCE { version INTEGER, community OCTET STRING, data PDU }
//! PDU        ::= [tag] { request-id INTEGER, error-status INTEGER,
//!                        error-index INTEGER, variable-bindings VarBindList }
//! VarBindList::= SEQUENCE OF VarBind
//! VarBind    ::= SEQUENCE { name OBJECT IDENTIFIER, value ObjectSyntax }
//! ```
//!
//! Lengths are computed bottom-up before anything is written, so every
//! message is serialized into a buffer of exactly the right size.

use crate::{
    ber::{self, DecodeError},
    oid::Oid,
};

/// SNMP version field value for SNMPv1.
pub const SNMP_VERSION_1: u8 = 0x00;

/// Community used when none is configured.
pub const DEFAULT_COMMUNITY: &str = "public";

/// Value carried by a variable binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarBindValue {
    /// Placeholder value of a GET request.
    Null,
    Integer(i64),
    OctetString(Vec<u8>),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    /// Any other tag, kept undecoded.
    Other { tag: u8, content: Vec<u8> },
}

impl VarBindValue {
    /// BER tag of this value.
    pub fn tag(&self) -> u8 {
        match self {
            VarBindValue::Null => ber::TAG_NULL,
            VarBindValue::Integer(_) => ber::TAG_INTEGER,
            VarBindValue::OctetString(_) => ber::TAG_OCTET_STRING,
            VarBindValue::Counter32(_) => ber::TAG_COUNTER32,
            VarBindValue::Gauge32(_) => ber::TAG_GAUGE32,
            VarBindValue::TimeTicks(_) => ber::TAG_TIMETICKS,
            VarBindValue::Counter64(_) => ber::TAG_COUNTER64,
            VarBindValue::Other { tag, .. } => *tag,
        }
    }

    /// Number of content octets.
    pub fn content_size(&self) -> usize {
        match self {
            VarBindValue::Null => 0,
            VarBindValue::Integer(v) => ber::integer_size(*v),
            VarBindValue::OctetString(v) => v.len(),
            VarBindValue::Counter32(v) | VarBindValue::Gauge32(v) | VarBindValue::TimeTicks(v) => {
                ber::unsigned_size(*v as u64)
            }
            VarBindValue::Counter64(v) => ber::unsigned_size(*v),
            VarBindValue::Other { content, .. } => content.len(),
        }
    }

    fn write_content(&self, buf: &mut Vec<u8>) {
        match self {
            VarBindValue::Null => {}
            VarBindValue::Integer(v) => ber::write_integer_content(buf, *v),
            VarBindValue::OctetString(v) => buf.extend_from_slice(v),
            VarBindValue::Counter32(v) | VarBindValue::Gauge32(v) | VarBindValue::TimeTicks(v) => {
                ber::write_unsigned_content(buf, *v as u64)
            }
            VarBindValue::Counter64(v) => ber::write_unsigned_content(buf, *v),
            VarBindValue::Other { content, .. } => buf.extend_from_slice(content),
        }
    }

    /// Decodes a value from its tag and content octets.
    ///
    /// # Errors
    /// Fails when a numeric value is empty or too wide for its type.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Self, DecodeError> {
        let value = match tag {
            ber::TAG_NULL => VarBindValue::Null,
            ber::TAG_INTEGER => VarBindValue::Integer(ber::decode_integer(content)?),
            ber::TAG_OCTET_STRING => VarBindValue::OctetString(content.to_vec()),
            ber::TAG_COUNTER32 => VarBindValue::Counter32(decode_u32(content)?),
            ber::TAG_GAUGE32 => VarBindValue::Gauge32(decode_u32(content)?),
            ber::TAG_TIMETICKS => VarBindValue::TimeTicks(decode_u32(content)?),
            ber::TAG_COUNTER64 => VarBindValue::Counter64(ber::decode_unsigned(content)?),
            _ => VarBindValue::Other {
                tag,
                content: content.to_vec(),
            },
        };
        Ok(value)
    }

    /// Numeric reading of this value, if it has one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            VarBindValue::Integer(v) => Some(*v),
            VarBindValue::Counter32(v) | VarBindValue::Gauge32(v) | VarBindValue::TimeTicks(v) => {
                Some(*v as i64)
            }
            VarBindValue::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

fn decode_u32(content: &[u8]) -> Result<u32, DecodeError> {
    let v = ber::decode_unsigned(content)?;
    u32::try_from(v).map_err(|_| DecodeError::IntegerTooLong(content.len()))
}

/// A variable binding (OID + value).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: VarBindValue,
}

impl VarBind {
    /// A binding with a NULL value, as sent in GET requests.
    pub fn null(oid: Oid) -> Self {
        VarBind {
            oid,
            value: VarBindValue::Null,
        }
    }

    fn content_size(&self) -> usize {
        ber::tlv_size(self.oid.content_size()) + ber::tlv_size(self.value.content_size())
    }

    fn write(&self, buf: &mut Vec<u8>, content_len: usize) {
        ber::write_header(buf, ber::TAG_SEQUENCE, content_len);
        ber::write_header(buf, ber::TAG_OBJECT_IDENTIFIER, self.oid.content_size());
        self.oid.write_content(buf);
        ber::write_header(buf, self.value.tag(), self.value.content_size());
        self.value.write_content(buf);
    }
}

/// A protocol data unit with its context tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pdu {
    pub tag: u8,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    /// A GetRequest-PDU asking for `oids`.
    pub fn get_request(request_id: i64, oids: &[Oid]) -> Self {
        Pdu {
            tag: ber::TAG_GET_REQUEST,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: oids.iter().cloned().map(VarBind::null).collect(),
        }
    }
}

/// A complete SNMP message ready to be encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

/// Content lengths of every constructed level, computed leaves first.
struct Layout {
    varbinds: Vec<usize>,
    list: usize,
    pdu: usize,
    message: usize,
}

impl Message {
    fn layout(&self) -> Layout {
        let varbinds: Vec<usize> = self.pdu.varbinds.iter().map(VarBind::content_size).collect();
        let list = varbinds.iter().map(|&len| ber::tlv_size(len)).sum();
        let pdu = ber::tlv_size(ber::integer_size(self.pdu.request_id))
            + ber::tlv_size(ber::integer_size(self.pdu.error_status))
            + ber::tlv_size(ber::integer_size(self.pdu.error_index))
            + ber::tlv_size(list);
        let message = ber::tlv_size(ber::integer_size(self.version))
            + ber::tlv_size(self.community.len())
            + ber::tlv_size(pdu);
        Layout {
            varbinds,
            list,
            pdu,
            message,
        }
    }

    /// Total size in bytes of the encoded message.
    pub fn encoded_size(&self) -> usize {
        ber::tlv_size(self.layout().message)
    }

    /// Serializes the message.
    pub fn encode(&self) -> Vec<u8> {
        let layout = self.layout();
        let total = ber::tlv_size(layout.message);
        let mut buf = Vec::with_capacity(total);

        ber::write_header(&mut buf, ber::TAG_SEQUENCE, layout.message);
        write_integer(&mut buf, self.version);
        ber::write_header(&mut buf, ber::TAG_OCTET_STRING, self.community.len());
        buf.extend_from_slice(&self.community);

        ber::write_header(&mut buf, self.pdu.tag, layout.pdu);
        write_integer(&mut buf, self.pdu.request_id);
        write_integer(&mut buf, self.pdu.error_status);
        write_integer(&mut buf, self.pdu.error_index);

        ber::write_header(&mut buf, ber::TAG_SEQUENCE, layout.list);
        for (vb, &len) in self.pdu.varbinds.iter().zip(&layout.varbinds) {
            vb.write(&mut buf, len);
        }

        debug_assert_eq!(buf.len(), total);
        buf
    }
}

fn write_integer(buf: &mut Vec<u8>, v: i64) {
    ber::write_header(buf, ber::TAG_INTEGER, ber::integer_size(v));
    ber::write_integer_content(buf, v);
}

/// An encoded GetRequest message. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMessage {
    bytes: Box<[u8]>,
    request_id: u8,
    oids: Vec<Oid>,
}

impl RequestMessage {
    /// The encoded datagram.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false for a built message.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Request ID carried in the PDU.
    pub fn request_id(&self) -> u8 {
        self.request_id
    }

    /// OIDs requested by this message, in request order.
    pub fn oids(&self) -> &[Oid] {
        &self.oids
    }
}

/// Builds GetRequest messages for one community.
///
/// Owns the request-ID counter: every message built takes the next ID,
/// wrapping modulo 256.
#[derive(Debug)]
pub struct MessageBuilder {
    version: u8,
    community: Vec<u8>,
    next_request_id: u8,
}

impl MessageBuilder {
    /// Creates an SNMPv1 builder for `community`.
    pub fn new(community: impl Into<Vec<u8>>) -> Self {
        MessageBuilder {
            version: SNMP_VERSION_1,
            community: community.into(),
            next_request_id: 0,
        }
    }

    /// Request ID the next built message will carry.
    pub fn next_request_id(&self) -> u8 {
        self.next_request_id
    }

    fn message(&self, request_id: u8, oids: &[Oid]) -> Message {
        Message {
            version: self.version as i64,
            community: self.community.clone(),
            pdu: Pdu::get_request(request_id as i64, oids),
        }
    }

    /// Upper bound of the encoded size of a GetRequest for `oids`.
    ///
    /// Sized with the widest request ID, so any message later built for the
    /// same OIDs is no larger. Does not advance the counter.
    pub fn get_request_size(&self, oids: &[Oid]) -> usize {
        self.message(u8::MAX, oids).encoded_size()
    }

    /// Builds a GetRequest for `oids` and advances the request-ID counter.
    pub fn build_get_request(&mut self, oids: &[Oid]) -> RequestMessage {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let bytes = self.message(request_id, oids).encode();
        log::trace!(
            "Built GetRequest id={} ({} OIDs, {} bytes): {}",
            request_id,
            oids.len(),
            bytes.len(),
            ber::HexDump(&bytes)
        );

        RequestMessage {
            bytes: bytes.into_boxed_slice(),
            request_id,
            oids: oids.to_vec(),
        }
    }
}
