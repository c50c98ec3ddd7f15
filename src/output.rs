//! Output of polled values.
//!
//! The polling engine hands its column layout to an [`Output`] once, after
//! caching, and then one [`Sample`] per poll cycle. [`Report`] renders both
//! as text, JSON lines or CSV.

use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Output format for poll results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// One JSON object per poll cycle.
    Json,
    /// CSV output for spreadsheet import.
    Csv,
}

/// One output column: a field of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Column {
    /// Index among the endpoints that opened successfully.
    pub endpoint: usize,
    pub host: String,
    pub field: String,
}

impl Column {
    /// Key used in JSON output, e.g. `pdu-0-phase`.
    pub fn key(&self) -> String {
        format!("pdu-{}-{}", self.endpoint, self.field)
    }

    /// Label used in the CSV header, e.g. `pdu1.example:phase`.
    pub fn label(&self) -> String {
        format!("{}:{}", self.host, self.field)
    }
}

/// Values of every column after one poll cycle, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<Option<i64>>,
}

/// Receiver of poll results.
pub trait Output {
    /// Announces the columns every following sample carries.
    fn header(&mut self, columns: &[Column]) -> io::Result<()>;

    /// Emits the values of one poll cycle.
    fn sample(&mut self, sample: &Sample) -> io::Result<()>;
}

/// Writes poll results in an [`OutputFormat`].
pub struct Report<W: Write> {
    format: OutputFormat,
    writer: W,
    columns: Vec<Column>,
}

impl Report<io::Stdout> {
    /// Report on standard output.
    pub fn stdout(format: OutputFormat) -> Self {
        Report::new(format, io::stdout())
    }
}

impl<W: Write> Report<W> {
    pub fn new(format: OutputFormat, writer: W) -> Self {
        Report {
            format,
            writer,
            columns: Vec::new(),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_text(&mut self, sample: &Sample) -> io::Result<()> {
        writeln!(
            self.writer,
            "--- {} ---",
            sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        for (column, value) in self.columns.iter().zip(&sample.values) {
            match value {
                Some(v) => writeln!(self.writer, "{} {}: {}", column.host, column.field, v)?,
                None => writeln!(self.writer, "{} {}: n/a", column.host, column.field)?,
            }
        }
        Ok(())
    }

    fn write_json(&mut self, sample: &Sample) -> io::Result<()> {
        let line = JsonSample {
            columns: &self.columns,
            sample,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        writeln!(self.writer)
    }

    fn write_csv(&mut self, sample: &Sample) -> io::Result<()> {
        let mut row = sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        for value in sample.values.iter().take(self.columns.len()) {
            row.push(',');
            row.push_str(&fmt_opt(*value));
        }
        writeln!(self.writer, "{}", row)
    }
}

impl<W: Write> Output for Report<W> {
    fn header(&mut self, columns: &[Column]) -> io::Result<()> {
        self.columns = columns.to_vec();
        match self.format {
            OutputFormat::Text => {
                let hosts = columns.last().map_or(0, |c| c.endpoint + 1);
                writeln!(
                    self.writer,
                    "Polling {} fields on {} PDUs",
                    columns.len(),
                    hosts
                )?;
            }
            OutputFormat::Json => {}
            OutputFormat::Csv => {
                let mut header = String::from("timestamp");
                for column in columns {
                    header.push(',');
                    header.push_str(&column.label());
                }
                writeln!(self.writer, "{}", header)?;
            }
        }
        self.writer.flush()
    }

    fn sample(&mut self, sample: &Sample) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.write_text(sample)?,
            OutputFormat::Json => self.write_json(sample)?,
            OutputFormat::Csv => self.write_csv(sample)?,
        }
        self.writer.flush()
    }
}

/// JSON view of a sample that keeps column order.
struct JsonSample<'a> {
    columns: &'a [Column],
    sample: &'a Sample,
}

impl Serialize for JsonSample<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 1))?;
        map.serialize_entry(
            "timestamp",
            &self
                .sample
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        for (column, value) in self.columns.iter().zip(&self.sample.values) {
            map.serialize_entry(&column.key(), value)?;
        }
        map.end()
    }
}

fn fmt_opt(v: Option<i64>) -> String {
    v.map_or_else(String::new, |x| x.to_string())
}
