//! Integration tests polling mock SNMP agents over loopback.

mod common;

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::time::timeout;

use common::{oid, spawn_agent, Behavior, Recorder};
use pdu_poller::{
    message::VarBindValue,
    poller::{CycleSummary, PduPoller, PollerSettings},
};

const IN_PKTS: &str = "1.3.6.1.2.1.11.1.0";
const PHASE: &str = "1.3.6.1.4.1.318.1.1.26.6.3.1.5.1";

fn settings() -> PollerSettings {
    PollerSettings {
        timeout: Duration::from_millis(500),
        ..PollerSettings::default()
    }
}

fn values(pairs: &[(&str, i64)]) -> HashMap<pdu_poller::oid::Oid, VarBindValue> {
    pairs
        .iter()
        .map(|(o, v)| (oid(o), VarBindValue::Integer(*v)))
        .collect()
}

/// Runs blocking poller code off the runtime thread so mock agents keep serving.
async fn run<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    timeout(Duration::from_secs(20), tokio::task::spawn_blocking(f))
        .await
        .expect("poller stalled")
        .unwrap()
}

/// Registers `hosts` and `fields`, caches, then runs `cycles` updates.
async fn poll(
    hosts: Vec<String>,
    fields: Vec<(String, String)>,
    settings: PollerSettings,
    cycles: usize,
) -> (PduPoller, Recorder, Vec<CycleSummary>, usize) {
    run(move || {
        let mut poller = PduPoller::new(settings);
        for host in &hosts {
            assert!(poller.register_endpoint(host));
        }
        let oids: Vec<&str> = fields.iter().map(|(o, _)| o.as_str()).collect();
        let names: Vec<&str> = fields.iter().map(|(_, n)| n.as_str()).collect();
        poller.register_fields(&oids, &names).unwrap();

        let mut out = Recorder::default();
        let cached = poller.cache(&mut out).unwrap();
        let summaries = (0..cycles).map(|_| poller.update(&mut out)).collect();
        (poller, out, summaries, cached)
    })
    .await
}

fn field(o: &str, name: &str) -> (String, String) {
    (o.to_string(), name.to_string())
}

#[tokio::test]
async fn test_single_integer_response() {
    let agent = spawn_agent(Behavior::Answer(values(&[(IN_PKTS, 42)]))).await;

    let (poller, out, summaries, cached) = poll(
        vec![agent.host()],
        vec![field(IN_PKTS, "snmpInPkts"), field(PHASE, "phase")],
        settings(),
        1,
    )
    .await;

    assert_eq!(cached, 1);
    assert_eq!(summaries[0].fragments_sent, 1);
    assert_eq!(summaries[0].fragments_failed, 0);
    assert_eq!(summaries[0].fields_updated, 1);
    assert_eq!(poller.get_value(0, "snmpInPkts"), Some(42));
    // The agent does not know this OID.
    assert_eq!(poller.get_value(0, "phase"), None);

    assert_eq!(out.columns.len(), 2);
    assert_eq!(out.samples.len(), 1);
    assert_eq!(out.samples[0].values, vec![Some(42), None]);
    assert_eq!(agent.requests(), 1);
}

#[tokio::test]
async fn test_hundred_fields_are_fragmented_and_populated() {
    let oids: Vec<String> = (1..=100)
        .map(|i| format!("1.3.6.1.4.1.318.1.1.26.8.3.1.5.{}", i))
        .collect();
    let answers = oids
        .iter()
        .enumerate()
        .map(|(i, o)| (oid(o), VarBindValue::Gauge32(i as u32 * 10)))
        .collect();
    let agent = spawn_agent(Behavior::Answer(answers)).await;

    let fields = oids
        .iter()
        .enumerate()
        .map(|(i, o)| field(o, &format!("outlet{}", i + 1)))
        .collect();
    let (poller, out, summaries, _) = poll(vec![agent.host()], fields, settings(), 1).await;

    let fragments = poller.endpoints()[0].requests().len();
    assert!(fragments >= 2, "only {} fragment(s)", fragments);
    assert!(poller.endpoints()[0]
        .requests()
        .iter()
        .all(|r| r.len() <= 255));
    assert_eq!(agent.requests(), fragments);
    assert!(agent.largest_request() <= 255);

    assert_eq!(summaries[0].fragments_failed, 0);
    assert_eq!(summaries[0].fields_updated, 100);
    for i in 0..100 {
        assert_eq!(
            poller.get_value(0, &format!("outlet{}", i + 1)),
            Some(i as i64 * 10)
        );
    }
    assert!(out.samples[0].values.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_unreachable_endpoint_does_not_block_others() {
    let agent = spawn_agent(Behavior::Answer(values(&[(PHASE, 17)]))).await;

    let (poller, out, summaries, cached) = poll(
        vec!["unreachable-pdu.invalid".to_string(), agent.host()],
        vec![field(PHASE, "phase")],
        settings(),
        1,
    )
    .await;

    assert_eq!(cached, 1);
    assert!(poller.is_enabled());
    assert_eq!(poller.endpoints().len(), 1);
    assert_eq!(poller.endpoints()[0].host(), agent.host());
    // Indices count opened endpoints only.
    assert_eq!(poller.get_value(0, "phase"), Some(17));
    assert_eq!(out.columns[0].key(), "pdu-0-phase");
    assert_eq!(summaries[0].endpoints, 1);
}

#[tokio::test]
async fn test_error_status_keeps_previous_values() {
    let agent = spawn_agent(Behavior::FailAfter(1, values(&[(PHASE, 42)]))).await;

    let (poller, out, summaries, _) =
        poll(vec![agent.host()], vec![field(PHASE, "phase")], settings(), 2).await;

    assert_eq!(summaries[0].fragments_failed, 0);
    assert_eq!(summaries[1].fragments_failed, 1);
    assert_eq!(summaries[1].fields_updated, 0);
    assert_eq!(poller.get_value(0, "phase"), Some(42));
    assert_eq!(out.samples[1].values, vec![Some(42)]);
}

#[tokio::test]
async fn test_malformed_response_is_rejected() {
    let agent = spawn_agent(Behavior::Garbage(vec![0x31, 0x03, 0x02, 0x01, 0x00])).await;

    let (poller, out, summaries, _) =
        poll(vec![agent.host()], vec![field(PHASE, "phase")], settings(), 1).await;

    assert_eq!(summaries[0].fragments_failed, 1);
    assert_eq!(poller.get_value(0, "phase"), None);
    assert_eq!(out.samples[0].values, vec![None]);
}

#[tokio::test]
async fn test_stale_response_is_discarded() {
    let agent = spawn_agent(Behavior::StaleFirst(values(&[(PHASE, 99)]))).await;

    let (poller, _, summaries, _) =
        poll(vec![agent.host()], vec![field(PHASE, "phase")], settings(), 1).await;

    assert_eq!(summaries[0].stale_responses, 1);
    assert_eq!(summaries[0].fragments_failed, 0);
    assert_eq!(poller.get_value(0, "phase"), Some(99));
}

#[tokio::test]
async fn test_silent_endpoint_times_out() {
    let silent = spawn_agent(Behavior::Silent).await;
    let agent = spawn_agent(Behavior::Answer(values(&[(PHASE, 5)]))).await;

    let settings = PollerSettings {
        timeout: Duration::from_millis(300),
        ..PollerSettings::default()
    };
    let started = Instant::now();
    let (poller, _, summaries, cached) = poll(
        vec![silent.host(), agent.host()],
        vec![field(PHASE, "phase")],
        settings,
        1,
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(cached, 2);
    assert_eq!(summaries[0].fragments_sent, 2);
    assert_eq!(summaries[0].fragments_failed, 1);
    assert_eq!(poller.get_value(0, "phase"), None);
    assert_eq!(poller.get_value(1, "phase"), Some(5));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(10));
    assert_eq!(silent.requests(), 1);
}

#[tokio::test]
async fn test_late_reply_is_not_taken_for_next_cycle() {
    let agent = spawn_agent(Behavior::LateFirst(Duration::from_millis(400))).await;

    let settings = PollerSettings {
        timeout: Duration::from_millis(300),
        ..PollerSettings::default()
    };
    let (poller, out, summaries, _) =
        poll(vec![agent.host()], vec![field(PHASE, "phase")], settings, 4).await;

    assert_eq!(summaries[0].fragments_failed, 1);
    assert_eq!(out.samples[0].values, vec![None]);
    // The answer to the first request shows up while the second one is pending.
    assert_eq!(summaries[1].stale_responses, 1);
    for (k, sample) in out.samples.iter().enumerate().skip(1) {
        assert_eq!(sample.values, vec![Some(k as i64 + 1)], "cycle {}", k + 1);
        assert_eq!(summaries[k].fragments_failed, 0);
    }
    assert_eq!(poller.get_value(0, "phase"), Some(4));
    assert_eq!(agent.requests(), 4);
}

#[tokio::test]
async fn test_late_reply_queued_between_cycles_is_dropped() {
    let agent = spawn_agent(Behavior::LateFirst(Duration::from_millis(400))).await;
    let host = agent.host();

    let (out, summaries) = run(move || {
        let mut poller = PduPoller::new(PollerSettings {
            timeout: Duration::from_millis(300),
            ..PollerSettings::default()
        });
        poller.register_endpoint(&host);
        poller.register_fields(&[PHASE], &["phase"]).unwrap();

        let mut out = Recorder::default();
        poller.cache(&mut out).unwrap();
        let mut summaries = Vec::new();
        for _ in 0..3 {
            summaries.push(poller.update(&mut out));
            std::thread::sleep(Duration::from_millis(300));
        }
        (out, summaries)
    })
    .await;

    assert_eq!(out.samples[0].values, vec![None]);
    // Dropped unread before the second request went out.
    assert_eq!(summaries[1].stale_responses, 1);
    assert_eq!(out.samples[1].values, vec![Some(2)]);
    assert_eq!(out.samples[2].values, vec![Some(3)]);
    assert_eq!(summaries[2].stale_responses, 0);
}
