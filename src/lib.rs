//! PDU Poller - SNMPv1 load polling for power distribution units.
//!
//! This crate polls a fixed set of OIDs from a list of PDU controllers over
//! SNMPv1 (RFC 1157), using a small self-contained BER codec. Requests that
//! do not fit a safe datagram are split into several GetRequests.
//!
//! # Usage
//!
//! Poll the default APC load OIDs from two PDUs every second:
//! ```bash
//! pdu-poller -H pdu1.example -H pdu2.example
//! ```
//!
//! Poll a custom field from an agent on a non-standard port, as CSV:
//! ```bash
//! pdu-poller -H 10.0.0.2:1161 -f load=1.3.6.1.4.1.318.1.1.12.2.3.1.1.2.1 --format csv
//! ```

/// BER tag-length-value primitives.
pub mod ber;
/// Command-line configuration and validation.
pub mod configuration;
/// Splitting of oversized GetRequests.
pub mod fragment;
/// SNMPv1 message model and encoder.
pub mod message;
/// Object identifiers.
pub mod oid;
/// Poll result formatting.
pub mod output;
/// Polling engine.
pub mod poller;
/// Message decoding and response caching.
pub mod response;
/// UDP transport to SNMP agents.
pub mod transport;
