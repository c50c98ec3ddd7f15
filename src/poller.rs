//! PDU polling engine.
//!
//! Endpoints and fields are registered first. [`PduPoller::cache`] then opens
//! every endpoint, plans how its fields split into GetRequest fragments and
//! announces the output columns. Each [`PduPoller::update`] walks the
//! endpoints in registration order, sends every fragment, waits for its
//! response and merges the values into that endpoint's [`ResponseCache`].
//! Fragments are rebuilt with a fresh request-id every cycle and anything
//! left queued on the socket is discarded before a send, so a late answer
//! to an earlier cycle is never merged as a current one.
//!
//! Failures never escape a cycle: a fragment that cannot be sent, is not
//! answered in time or is answered badly leaves its fields stale, is logged,
//! and is counted in the returned [`CycleSummary`].

use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::{
    ber,
    fragment::{self, FragmentError, DEFAULT_SEND_MAX},
    message::{MessageBuilder, RequestMessage, DEFAULT_COMMUNITY},
    oid::{Oid, OidError},
    output::{Column, Output, Sample},
    response::{self, Field, MergeSummary, ResponseCache, ResponseError},
    transport::{Connection, TransportError, RESPONSE_MAX, SNMP_PORT},
};

/// Default time to wait for each fragment's response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Protocol and transport settings shared by all endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub community: String,
    /// Agent port used when a host does not name one.
    pub port: u16,
    /// Largest GetRequest datagram, in bytes.
    pub send_max: usize,
    /// Response deadline per fragment.
    pub timeout: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        PollerSettings {
            community: DEFAULT_COMMUNITY.to_string(),
            port: SNMP_PORT,
            send_max: DEFAULT_SEND_MAX,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Errors raised by misuse of the registration interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("Got {oids} OIDs but {names} field names")]
    LengthMismatch { oids: usize, names: usize },
    #[error("Field '{0}' is already registered")]
    DuplicateField(String),
    #[error("OID {0} is already registered")]
    DuplicateOid(Oid),
    #[error("Invalid OID '{oid}': {source}")]
    InvalidOid {
        oid: String,
        #[source]
        source: OidError,
    },
    #[error("Fields cannot be registered after endpoints are cached")]
    AlreadyCached,
}

/// Why one fragment exchange failed.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ResponseError),
    #[error("Discarded response with request-id {received}, expected {expected}")]
    StaleResponse { expected: u8, received: i64 },
}

/// Counters of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub endpoints: usize,
    pub fragments_sent: usize,
    pub fragments_failed: usize,
    pub fields_updated: usize,
    pub stale_responses: usize,
}

/// An opened endpoint with its fragments and last known values.
#[derive(Debug)]
pub struct Endpoint {
    connection: Connection,
    requests: Vec<RequestMessage>,
    cache: ResponseCache,
    polled: bool,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        self.connection.host()
    }

    /// GetRequest fragments of the latest cycle, in order.
    pub fn requests(&self) -> &[RequestMessage] {
        &self.requests
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Registering,
    Polling,
    Disabled,
}

/// Polls load readings from a set of PDUs over SNMPv1.
pub struct PduPoller {
    settings: PollerSettings,
    hosts: Vec<String>,
    fields: Vec<Field>,
    endpoints: Vec<Endpoint>,
    builder: MessageBuilder,
    buf: Vec<u8>,
    state: State,
}

impl PduPoller {
    pub fn new(settings: PollerSettings) -> Self {
        let builder = MessageBuilder::new(settings.community.as_bytes());
        PduPoller {
            settings,
            hosts: Vec::new(),
            fields: Vec::new(),
            endpoints: Vec::new(),
            builder,
            buf: vec![0u8; RESPONSE_MAX],
            state: State::Registering,
        }
    }

    /// Adds a host to poll. Returns false for an empty or repeated host, or
    /// once endpoints are cached.
    pub fn register_endpoint(&mut self, host: &str) -> bool {
        let host = host.trim();
        if self.state != State::Registering {
            log::warn!("Ignoring endpoint {}: endpoints are already cached", host);
            return false;
        }
        if host.is_empty() || self.hosts.iter().any(|h| h == host) {
            return false;
        }
        self.hosts.push(host.to_string());
        true
    }

    /// Adds fields polled from every endpoint; `oids[i]` is stored as `names[i]`.
    ///
    /// Nothing is registered when any entry is rejected.
    ///
    /// # Errors
    /// Fails on mismatched list lengths, an unparsable OID, a repeated name or
    /// OID, or when called after [`PduPoller::cache`].
    pub fn register_fields<O, N>(&mut self, oids: &[O], names: &[N]) -> Result<(), PollerError>
    where
        O: AsRef<str>,
        N: AsRef<str>,
    {
        if self.state != State::Registering {
            return Err(PollerError::AlreadyCached);
        }
        if oids.len() != names.len() {
            return Err(PollerError::LengthMismatch {
                oids: oids.len(),
                names: names.len(),
            });
        }

        let mut added: Vec<Field> = Vec::with_capacity(oids.len());
        for (oid, name) in oids.iter().zip(names) {
            let oid = oid
                .as_ref()
                .parse::<Oid>()
                .map_err(|source| PollerError::InvalidOid {
                    oid: oid.as_ref().to_string(),
                    source,
                })?;
            let name = name.as_ref().to_string();

            let known = self.fields.iter().chain(&added);
            for field in known {
                if field.name == name {
                    return Err(PollerError::DuplicateField(name));
                }
                if field.oid == oid {
                    return Err(PollerError::DuplicateOid(oid));
                }
            }
            added.push(Field { name, oid });
        }

        self.fields.extend(added);
        Ok(())
    }

    /// Opens the endpoints, builds their fragments and emits the column header.
    ///
    /// Endpoints that cannot be opened are logged and left out; the rest keep
    /// their registration order and are indexed from zero. Returns the number
    /// of endpoints to satisfy. When it is zero the poller disables itself.
    ///
    /// # Errors
    /// [`FragmentError::OidTooLarge`] when a field cannot fit a single request;
    /// the poller is disabled in that case.
    pub fn cache(&mut self, out: &mut dyn Output) -> Result<usize, FragmentError> {
        if self.state != State::Registering {
            return Ok(self.endpoints.len());
        }
        if self.fields.is_empty() {
            log::error!("No fields registered, nothing to satisfy; disabling PDU polling");
            self.state = State::Disabled;
            return Ok(0);
        }

        let oids: Vec<Oid> = self.fields.iter().map(|f| f.oid.clone()).collect();
        let plan = match fragment::plan_fragments(&self.builder, &oids, self.settings.send_max) {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("{}; disabling PDU polling", e);
                self.state = State::Disabled;
                return Err(e);
            }
        };
        log::debug!(
            "{} fields fit in {} request(s) of at most {} bytes",
            oids.len(),
            plan.len(),
            self.settings.send_max
        );

        for host in &self.hosts {
            let connection = match Connection::open(host, self.settings.port) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("Skipping PDU {}: {}", host, e);
                    continue;
                }
            };
            let requests = plan
                .iter()
                .map(|range| self.builder.build_get_request(&oids[range.clone()]))
                .collect();
            self.endpoints.push(Endpoint {
                connection,
                requests,
                cache: ResponseCache::new(self.fields.clone()),
                polled: false,
            });
        }

        if self.endpoints.is_empty() {
            log::error!("No PDUs cached, nothing to satisfy; disabling PDU polling");
            self.state = State::Disabled;
            return Ok(0);
        }

        log::info!(
            "Tracking {} PDUs ({} of {} registered)",
            self.endpoints.len(),
            self.endpoints.len(),
            self.hosts.len()
        );
        self.state = State::Polling;

        if let Err(e) = out.header(&self.columns()) {
            log::warn!("Failed to write output header: {}", e);
        }
        Ok(self.endpoints.len())
    }

    /// Output columns: every field of every opened endpoint.
    pub fn columns(&self) -> Vec<Column> {
        self.endpoints
            .iter()
            .enumerate()
            .flat_map(|(index, endpoint)| {
                self.fields.iter().map(move |field| Column {
                    endpoint: index,
                    host: endpoint.host().to_string(),
                    field: field.name.clone(),
                })
            })
            .collect()
    }

    /// Runs one poll cycle and emits its sample.
    ///
    /// Does nothing unless [`PduPoller::cache`] opened at least one endpoint.
    pub fn update(&mut self, out: &mut dyn Output) -> CycleSummary {
        let mut summary = CycleSummary::default();
        if self.state != State::Polling {
            log::debug!("PDU polling is not active, skipping cycle");
            return summary;
        }

        let timeout = self.settings.timeout;
        for endpoint in &mut self.endpoints {
            summary.endpoints += 1;
            endpoint.cache.begin_cycle();

            for i in 0..endpoint.requests.len() {
                if endpoint.polled {
                    let next = self.builder.build_get_request(endpoint.requests[i].oids());
                    endpoint.requests[i] = next;
                }
                let request = &endpoint.requests[i];
                summary.fragments_sent += 1;
                let result = exchange(
                    &endpoint.connection,
                    request,
                    &mut endpoint.cache,
                    &mut self.buf,
                    timeout,
                    &mut summary.stale_responses,
                );
                match result {
                    Ok(merged) => summary.fields_updated += merged.updated,
                    Err(e) => {
                        summary.fragments_failed += 1;
                        log::warn!(
                            "PDU {}: request {} of {} ({} OIDs) failed: {}",
                            endpoint.connection.host(),
                            i + 1,
                            endpoint.requests.len(),
                            request.oids().len(),
                            e
                        );
                    }
                }
            }
            endpoint.polled = true;
        }

        let sample = Sample {
            timestamp: Utc::now(),
            values: self
                .endpoints
                .iter()
                .flat_map(|e| e.cache.values().iter().copied())
                .collect(),
        };
        if let Err(e) = out.sample(&sample) {
            log::warn!("Failed to write sample: {}", e);
        }

        log::debug!("Poll cycle finished: {:?}", summary);
        summary
    }

    /// Last value of `field_name` on the endpoint at `endpoint_index`.
    ///
    /// `None` for an unknown endpoint or field, or a field with no data yet.
    pub fn get_value(&self, endpoint_index: usize, field_name: &str) -> Option<i64> {
        self.endpoints
            .get(endpoint_index)
            .and_then(|e| e.cache.get(field_name))
    }

    /// Opened endpoints, in registration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// False once the poller found nothing to satisfy.
    pub fn is_enabled(&self) -> bool {
        self.state != State::Disabled
    }

    /// Closes every endpoint; the poller stays disabled afterwards.
    pub fn close(&mut self) {
        for endpoint in self.endpoints.drain(..) {
            endpoint.connection.close();
        }
        self.state = State::Disabled;
    }
}

/// Sends one fragment and merges its answer.
///
/// Datagrams queued before the send are dropped unread. Responses carrying
/// another request-id are discarded until the deadline. Both count as stale.
fn exchange(
    connection: &Connection,
    request: &RequestMessage,
    cache: &mut ResponseCache,
    buf: &mut [u8],
    timeout: Duration,
    stale: &mut usize,
) -> Result<MergeSummary, PollError> {
    let late = connection.drain(buf)?;
    if late > 0 {
        *stale += late;
        log::debug!("PDU {}: dropped {} late response(s)", connection.host(), late);
    }

    connection.send(request.as_bytes())?;
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let n = connection
            .receive(buf, remaining)
            .map_err(|e| match e {
                TransportError::TimedOut(_) => TransportError::TimedOut(timeout),
                e => e,
            })?;

        let pdu = response::decode_message(&buf[..n], ber::TAG_GET_RESPONSE)?.pdu;
        if pdu.request_id != request.request_id() as i64 {
            *stale += 1;
            log::debug!(
                "PDU {}: {}",
                connection.host(),
                PollError::StaleResponse {
                    expected: request.request_id(),
                    received: pdu.request_id,
                }
            );
            continue;
        }

        response::ensure_success(&pdu)?;
        return Ok(cache.merge(&pdu));
    }
}
