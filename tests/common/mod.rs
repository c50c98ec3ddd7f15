//! Loopback SNMP agent used by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{net::UdpSocket, task::JoinHandle};

use pdu_poller::{
    ber,
    message::{Message, Pdu, VarBind, VarBindValue},
    oid::Oid,
    output::{Column, Output, Sample},
    response::{decode_message, ReceivedMessage},
};

/// How the agent answers each GetRequest.
#[derive(Clone)]
pub enum Behavior {
    /// Answers every requested OID it knows.
    Answer(HashMap<Oid, VarBindValue>),
    /// Answers normally for the first `n` requests, then with error-status 5 (genErr).
    FailAfter(usize, HashMap<Oid, VarBindValue>),
    /// Sends a response for another request-id before the real answer.
    StaleFirst(HashMap<Oid, VarBindValue>),
    /// Answers request `k` (counting from 1) with the value `k` for every
    /// requested OID, holding back the first answer for the given delay.
    LateFirst(Duration),
    /// Replies with fixed bytes.
    Garbage(Vec<u8>),
    /// Never replies.
    Silent,
}

/// Counters kept by a running agent.
#[derive(Default)]
pub struct AgentStats {
    pub requests: AtomicUsize,
    pub largest_request: AtomicUsize,
}

pub struct MockAgent {
    pub port: u16,
    pub stats: Arc<AgentStats>,
    handle: JoinHandle<()>,
}

impl MockAgent {
    /// Address to register with the poller.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    pub fn largest_request(&self) -> usize {
        self.stats.largest_request.load(Ordering::SeqCst)
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts an agent on an ephemeral loopback port.
pub async fn spawn_agent(behavior: Behavior) -> MockAgent {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let stats = Arc::new(AgentStats::default());
    let handle = tokio::spawn(serve(socket, behavior, stats.clone()));
    MockAgent {
        port,
        stats,
        handle,
    }
}

async fn serve(socket: UdpSocket, behavior: Behavior, stats: Arc<AgentStats>) {
    let mut buf = [0u8; 2048];
    let mut answered = 0usize;

    loop {
        let Ok((len, src)) = socket.recv_from(&mut buf).await else {
            return;
        };
        stats.requests.fetch_add(1, Ordering::SeqCst);
        stats.largest_request.fetch_max(len, Ordering::SeqCst);

        let Ok(request) = decode_message(&buf[..len], ber::TAG_GET_REQUEST) else {
            continue;
        };

        let replies = match &behavior {
            Behavior::Answer(values) => vec![answer(&request, request.pdu.request_id, 0, values)],
            Behavior::FailAfter(n, values) => {
                let status = if answered < *n { 0 } else { 5 };
                vec![answer(&request, request.pdu.request_id, status, values)]
            }
            Behavior::StaleFirst(values) => vec![
                answer(&request, request.pdu.request_id + 1, 0, &HashMap::new()),
                answer(&request, request.pdu.request_id, 0, values),
            ],
            Behavior::LateFirst(delay) => {
                if answered == 0 {
                    tokio::time::sleep(*delay).await;
                }
                let k = answered as i64 + 1;
                let values = request
                    .pdu
                    .varbinds
                    .iter()
                    .map(|vb| (vb.oid.clone(), VarBindValue::Integer(k)))
                    .collect();
                vec![answer(&request, request.pdu.request_id, 0, &values)]
            }
            Behavior::Garbage(bytes) => vec![bytes.clone()],
            Behavior::Silent => Vec::new(),
        };
        answered += 1;

        for reply in replies {
            if socket.send_to(&reply, src).await.is_err() {
                return;
            }
        }
    }
}

/// Encodes a GetResponse for `request`.
pub fn answer(
    request: &ReceivedMessage,
    request_id: i64,
    error_status: i64,
    values: &HashMap<Oid, VarBindValue>,
) -> Vec<u8> {
    let varbinds = request
        .pdu
        .varbinds
        .iter()
        .filter_map(|vb| {
            values.get(&vb.oid).map(|value| VarBind {
                oid: vb.oid.clone(),
                value: value.clone(),
            })
        })
        .collect();

    Message {
        version: request.version.unwrap_or(0),
        community: request.community.clone().unwrap_or_default(),
        pdu: Pdu {
            tag: ber::TAG_GET_RESPONSE,
            request_id,
            error_status,
            error_index: if error_status == 0 { 0 } else { 1 },
            varbinds,
        },
    }
    .encode()
}

pub fn oid(s: &str) -> Oid {
    s.parse().unwrap()
}

/// Output collaborator that keeps everything it is given.
#[derive(Default)]
pub struct Recorder {
    pub columns: Vec<Column>,
    pub samples: Vec<Sample>,
}

impl Output for Recorder {
    fn header(&mut self, columns: &[Column]) -> io::Result<()> {
        self.columns = columns.to_vec();
        Ok(())
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        self.samples.push(sample.clone());
        Ok(())
    }
}
