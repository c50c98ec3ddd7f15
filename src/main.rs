use std::{
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use pdu_poller::{
    configuration::{Configuration, Parser},
    output::Report,
    poller::PduPoller,
};

/// Granularity of the wait between cycles, so interruption is noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() {
    let conf = Configuration::parse();

    env_logger::Builder::new()
        .filter_level(conf.debug.level_filter())
        .parse_default_env()
        .init();

    if let Err(e) = conf.validate() {
        log::error!("Configuration is broken: {}", e);
        process::exit(2);
    }
    log::info!("Configuration valid. Starting up...");

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, stopping after the current cycle");
            cancel_signal.store(true, Ordering::Relaxed);
        }
    });

    // The poller does blocking socket I/O.
    let worker = tokio::task::spawn_blocking(move || poll_loop(&conf, &cancel));
    match worker.await {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("Polling task failed: {}", e);
            process::exit(1);
        }
    }
}

fn poll_loop(conf: &Configuration, cancel: &AtomicBool) -> i32 {
    let mut poller = PduPoller::new(conf.settings());
    for host in &conf.hosts {
        if !poller.register_endpoint(host) {
            log::warn!("Ignoring repeated or empty host '{}'", host);
        }
    }

    let fields = conf.fields();
    let oids: Vec<String> = fields.iter().map(|f| f.oid.to_string()).collect();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    if let Err(e) = poller.register_fields(&oids, &names) {
        log::error!("Cannot register fields: {}", e);
        return 1;
    }

    let mut out = Report::stdout(conf.format);
    match poller.cache(&mut out) {
        Ok(0) => return 1,
        Ok(_) => {}
        Err(e) => {
            log::error!("Cannot build requests: {}", e);
            return 1;
        }
    }

    let interval = conf.interval();
    let mut cycles = 0u64;
    while !cancel.load(Ordering::Relaxed) {
        let started = Instant::now();
        let summary = poller.update(&mut out);
        cycles += 1;

        if summary.fragments_failed > 0 {
            log::info!(
                "Cycle {}: {} of {} requests failed",
                cycles,
                summary.fragments_failed,
                summary.fragments_sent
            );
        }
        if conf.count.is_some_and(|count| cycles >= count) {
            break;
        }
        wait_until(started + interval, cancel);
    }

    poller.close();
    log::info!("Stopped after {} cycles", cycles);
    0
}

fn wait_until(deadline: Instant, cancel: &AtomicBool) {
    while !cancel.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(SLEEP_SLICE));
    }
}
