//! SNMP Object Identifiers.
//!
//! OIDs are registered as dotted strings (`1.3.6.1.4.1.318...`) and travel on
//! the wire as X.690 OBJECT IDENTIFIER content: the first two arcs collapse
//! into one sub-identifier `40 * X + Y` (`1.3` becomes the familiar `0x2b`),
//! every following arc is a base-128 group.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::ber::{self, DecodeError};

/// Errors that can occur when parsing a dotted OID string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OidError {
    #[error("Empty OID")]
    Empty,
    #[error("Invalid OID arc '{0}'")]
    InvalidArc(String),
    #[error("OID needs at least two arcs, got {0}")]
    TooShort(usize),
    #[error("OID first arcs {0}.{1} are outside the X.690 range")]
    InvalidRoot(u32, u32),
}

/// An SNMP Object Identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    /// Creates an OID from its arcs, checking the X.690 root constraints.
    pub fn from_slice(arcs: &[u32]) -> Result<Self, OidError> {
        match arcs {
            [] => Err(OidError::Empty),
            [_] => Err(OidError::TooShort(1)),
            [first, second, ..] if *first > 2 || (*first < 2 && *second >= 40) => {
                Err(OidError::InvalidRoot(*first, *second))
            }
            // 2.Y folds into a single 32-bit sub-identifier.
            [2, second, ..] if *second > u32::MAX - 80 => Err(OidError::InvalidRoot(2, *second)),
            _ => Ok(Oid(arcs.to_vec())),
        }
    }

    /// Returns the arcs of this OID.
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Returns the number of arcs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a valid OID has at least two arcs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn first_subidentifier(&self) -> u32 {
        self.0[0] * 40 + self.0[1]
    }

    /// Number of content octets of the OBJECT IDENTIFIER encoding.
    pub fn content_size(&self) -> usize {
        ber::oid_component_size(self.first_subidentifier())
            + self.0[2..]
                .iter()
                .map(|&arc| ber::oid_component_size(arc))
                .sum::<usize>()
    }

    /// Appends the OBJECT IDENTIFIER content octets (no tag or length).
    pub fn write_content(&self, buf: &mut Vec<u8>) {
        ber::write_oid_component(buf, self.first_subidentifier());
        for &arc in &self.0[2..] {
            ber::write_oid_component(buf, arc);
        }
    }

    /// Decodes OBJECT IDENTIFIER content octets.
    ///
    /// # Errors
    /// Fails on empty content, a truncated multi-byte arc or an arc overflowing 32 bits.
    pub fn decode_content(content: &[u8]) -> Result<Self, DecodeError> {
        if content.is_empty() {
            return Err(DecodeError::InvalidOid);
        }

        let (first, mut offset) = ber::decode_oid_component(content)?;
        let mut arcs = Vec::with_capacity(content.len() + 1);
        match first {
            0..=39 => arcs.extend_from_slice(&[0, first]),
            40..=79 => arcs.extend_from_slice(&[1, first - 40]),
            _ => arcs.extend_from_slice(&[2, first - 80]),
        }

        while offset < content.len() {
            let (arc, consumed) = ber::decode_oid_component(&content[offset..])?;
            arcs.push(arc);
            offset += consumed;
        }

        Ok(Oid(arcs))
    }
}

impl FromStr for Oid {
    type Err = OidError;

    /// Parses a dotted OID; a single leading dot is tolerated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if body.is_empty() {
            return Err(OidError::Empty);
        }

        let arcs = body
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| OidError::InvalidArc(arc.to_string()))
            })
            .collect::<Result<Vec<u32>, OidError>>()?;

        Oid::from_slice(&arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arc) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", arc)?;
        }
        Ok(())
    }
}
