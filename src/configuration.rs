//! Command-line configuration and validation.

use std::{collections::HashSet, str::FromStr, time::Duration};

pub use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::{
    fragment::DEFAULT_SEND_MAX,
    message::{MessageBuilder, DEFAULT_COMMUNITY},
    oid::Oid,
    output::OutputFormat,
    poller::PollerSettings,
    transport::SNMP_PORT,
};

/// APC per-phase load (tenths of amperes).
pub const APC_PHASE_LOAD_OID: &str = "1.3.6.1.4.1.318.1.1.26.6.3.1.5.1";
/// APC bank 1 load.
pub const APC_BANK1_LOAD_OID: &str = "1.3.6.1.4.1.318.1.1.26.8.3.1.5.1";
/// APC bank 2 load.
pub const APC_BANK2_LOAD_OID: &str = "1.3.6.1.4.1.318.1.1.26.8.3.1.5.2";

/// Fields polled when none are configured.
pub const APC_LOAD_FIELDS: [(&str, &str); 3] = [
    ("phase", APC_PHASE_LOAD_OID),
    ("bank1", APC_BANK1_LOAD_OID),
    ("bank2", APC_BANK2_LOAD_OID),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("At least one --host is required")]
    NoHosts,
    #[error("Timeout must be greater than zero")]
    ZeroTimeout,
    #[error("Send limit {send_max} is below the smallest possible request ({minimum} bytes)")]
    SendMaxTooSmall { send_max: usize, minimum: usize },
    #[error("Interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),
    #[error("Field '{0}' is given more than once")]
    DuplicateField(String),
    #[error("Invalid field '{0}', expected NAME=OID")]
    InvalidField(String),
}

/// Amount of diagnostic logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DebugLevel {
    /// Warnings and errors only.
    #[default]
    Off,
    /// Adds endpoint setup and summaries.
    Minimal,
    /// Adds per-request detail.
    Verbose,
}

impl DebugLevel {
    /// Default log filter for this level; `RUST_LOG` takes precedence.
    pub fn level_filter(self) -> log::LevelFilter {
        match self {
            DebugLevel::Off => log::LevelFilter::Warn,
            DebugLevel::Minimal => log::LevelFilter::Info,
            DebugLevel::Verbose => log::LevelFilter::Debug,
        }
    }
}

/// A field given on the command line as `NAME=OID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub oid: Oid,
}

impl FromStr for FieldSpec {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidField(s.to_string());
        let (name, oid) = s.split_once('=').ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }
        let oid = oid.parse::<Oid>().map_err(|_| invalid())?;
        Ok(FieldSpec {
            name: name.to_string(),
            oid,
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author = "Piotr Olszewski", version, about, long_about = None)]
pub struct Configuration {
    /// PDU to poll: hostname, IP address or host:port (repeatable)
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,
    /// Field to poll as NAME=OID (repeatable, defaults to the APC load OIDs)
    #[arg(short, long = "field", value_name = "NAME=OID")]
    pub fields: Vec<FieldSpec>,
    /// SNMP community string
    #[arg(short, long, default_value = DEFAULT_COMMUNITY)]
    pub community: String,
    /// Agent port for hosts that do not name one
    #[arg(short, long, default_value_t = SNMP_PORT)]
    pub port: u16,
    /// Largest request datagram in bytes
    #[arg(long, default_value_t = DEFAULT_SEND_MAX)]
    pub send_max: usize,
    /// Response timeout per request in milliseconds
    #[arg(short, long, default_value_t = 2000)]
    pub timeout: u64,
    /// Seconds between poll cycles
    #[arg(short, long, default_value_t = 1.0)]
    pub interval: f64,
    /// Number of poll cycles (runs until interrupted when omitted)
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug output level
    #[arg(short, long, value_enum, default_value_t = DebugLevel::Off)]
    pub debug: DebugLevel,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(ConfigurationError::NoHosts);
        }
        if self.timeout == 0 {
            return Err(ConfigurationError::ZeroTimeout);
        }
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(ConfigurationError::InvalidInterval(self.interval));
        }

        let minimum = MessageBuilder::new(self.community.as_bytes()).get_request_size(&[]);
        if self.send_max < minimum {
            return Err(ConfigurationError::SendMaxTooSmall {
                send_max: self.send_max,
                minimum,
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigurationError::DuplicateField(field.name.clone()));
            }
        }

        Ok(())
    }

    /// Configured fields, or the APC load fields when none were given.
    pub fn fields(&self) -> Vec<FieldSpec> {
        if !self.fields.is_empty() {
            return self.fields.clone();
        }
        let mut fields = Vec::with_capacity(APC_LOAD_FIELDS.len());
        for (name, oid) in APC_LOAD_FIELDS {
            match oid.parse() {
                Ok(oid) => fields.push(FieldSpec {
                    name: name.to_string(),
                    oid,
                }),
                Err(e) => log::error!("Skipping default field {} ({}): {}", name, oid, e),
            }
        }
        fields
    }

    pub fn settings(&self) -> PollerSettings {
        PollerSettings {
            community: self.community.clone(),
            port: self.port,
            send_max: self.send_max,
            timeout: Duration::from_millis(self.timeout),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}
