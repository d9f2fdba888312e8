use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

use super::{PacketProcessor, SinkError};
use crate::analysis::{AnalysisResult, JavaSerialDecoder, ObjectDecoder, analyze_with};
use crate::packet::Packet;

pub const RESULT_SEPARATOR: &str = "---------------- END ----------------";

/// Histogram key. Ordering puts the absent type first, then type names,
/// then `false` before `true`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AggregateKey {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub length_in_prefix: bool,
}

impl From<&AnalysisResult> for AggregateKey {
    fn from(result: &AnalysisResult) -> Self {
        Self {
            type_name: result.type_name.clone(),
            length_in_prefix: result.length_in_prefix,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{type: {}, length found: {}}}",
            self.type_name.as_deref().unwrap_or("null"),
            self.length_in_prefix
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisFormat {
    #[default]
    Text,
    JsonLines,
}

#[derive(Serialize)]
struct ResultLine<'a> {
    result: &'a AnalysisResult,
}

#[derive(Serialize)]
struct AggregateLine<'a> {
    aggregate: AggregateEntry<'a>,
}

#[derive(Serialize)]
struct AggregateEntry<'a> {
    #[serde(flatten)]
    key: &'a AggregateKey,
    count: u64,
}

/// Scans each packet, writes the result and keeps the aggregate histogram.
pub struct AnalysisWriter<W: Write + Send + 'static> {
    out: W,
    format: AnalysisFormat,
    decoder: Box<dyn ObjectDecoder>,
    histogram: BTreeMap<AggregateKey, u64>,
}

impl<W: Write + Send + 'static> AnalysisWriter<W> {
    pub fn new(out: W, format: AnalysisFormat) -> Self {
        Self::with_decoder(out, format, Box::new(JavaSerialDecoder))
    }

    pub fn with_decoder(out: W, format: AnalysisFormat, decoder: Box<dyn ObjectDecoder>) -> Self {
        Self {
            out,
            format,
            decoder,
            histogram: BTreeMap::new(),
        }
    }

    pub fn histogram(&self) -> &BTreeMap<AggregateKey, u64> {
        &self.histogram
    }

    fn write_result(&mut self, result: &AnalysisResult) -> io::Result<()> {
        match self.format {
            AnalysisFormat::Text => {
                writeln!(self.out)?;
                writeln!(self.out, "{result}")?;
                writeln!(self.out, "{RESULT_SEPARATOR}")
            }
            AnalysisFormat::JsonLines => {
                serde_json::to_writer(&mut self.out, &ResultLine { result })?;
                writeln!(self.out)
            }
        }
    }

    fn write_histogram(&mut self) -> io::Result<()> {
        for (key, &count) in &self.histogram {
            match self.format {
                AnalysisFormat::Text => writeln!(self.out, "{key}: {count}")?,
                AnalysisFormat::JsonLines => {
                    let line = AggregateLine {
                        aggregate: AggregateEntry { key, count },
                    };
                    serde_json::to_writer(&mut self.out, &line)?;
                    writeln!(self.out)?;
                }
            }
        }
        self.out.flush()
    }
}

impl<W: Write + Send + 'static> PacketProcessor for AnalysisWriter<W> {
    fn process(&mut self, packet: &Packet) -> Result<(), SinkError> {
        let result = analyze_with(self.decoder.as_ref(), packet);
        *self.histogram.entry(AggregateKey::from(&result)).or_insert(0) += 1;
        self.write_result(&result)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.write_histogram()?;
        Ok(())
    }
}
