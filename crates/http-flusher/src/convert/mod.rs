//! Serialization of pipeline records into request bodies.
//!
//! A [`Converter`] is chosen once from the configured protocol and encoding.
//! Besides encoding records it tells the rest of the engine which
//! [`Scope`] query placeholders resolve against and which input [`Shape`]
//! it accepts.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::models::{EventType, Log, LogGroup, PipelineEvent, TAG_PREFIX, strip_tag_prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    CustomSingle,
    Influxdb,
    Raw,
}

impl Protocol {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "custom_single" => Some(Self::CustomSingle),
            "influxdb" => Some(Self::Influxdb),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::CustomSingle => write!(f, "custom_single"),
            Protocol::Influxdb => write!(f, "influxdb"),
            Protocol::Raw => write!(f, "raw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Custom,
}

impl Encoding {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "json" => Some(Self::Json),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Json => write!(f, "json"),
            Encoding::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertConfig {
    pub protocol: Option<Protocol>,
    pub encoding: Option<Encoding>,
    /// Joins the events of one generic group into a single body when set.
    pub separator: Option<String>,
}

/// Variable source that query placeholders are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Tags shared by a whole legacy group.
    GroupTags,
    /// `__tag__:` contents carried by each legacy log.
    RecordTags,
    /// Metadata and tags of a generic group.
    GroupMetadata,
}

impl Scope {
    pub fn is_record_level(self) -> bool {
        matches!(self, Scope::RecordTags)
    }
}

/// Input shape a converter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// [`LogGroup`] batches passed to `flush`.
    Legacy,
    /// [`crate::models::PipelineGroupEvents`] batches passed to `export`.
    Generic,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Legacy => write!(f, "log group"),
            Shape::Generic => write!(f, "pipeline event"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("protocol and encoding must both be configured")]
    Unspecified,

    #[error("unsupported protocol/encoding combination: {protocol}/{encoding}")]
    UnsupportedPair {
        protocol: Protocol,
        encoding: Encoding,
    },

    #[error("{0} input is not supported by this converter")]
    WrongShape(Shape),

    #[error("unsupported event type: {0}")]
    UnsupportedEvent(EventType),

    #[error("log is missing required field {0}")]
    MissingField(&'static str),

    #[error("log field {field} has invalid value: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    InfluxLine,
    SingleJson,
    Raw,
}

/// Encodes records for the configured protocol.
///
/// `custom_single` encodes one JSON object per log, but requests are only
/// split per log when the query references record tags. Without such a
/// placeholder every log of a group shares one URL, and the endpoint
/// receives the group as newline-delimited JSON in one body.
#[derive(Debug, Clone)]
pub struct Converter {
    format: Format,
    separator: Option<String>,
}

impl Converter {
    pub fn new(config: &ConvertConfig) -> Result<Self, ConvertError> {
        let (Some(protocol), Some(encoding)) = (config.protocol, config.encoding) else {
            return Err(ConvertError::Unspecified);
        };
        let format = match (protocol, encoding) {
            (Protocol::Influxdb, Encoding::Custom) => Format::InfluxLine,
            (Protocol::CustomSingle, Encoding::Json) => Format::SingleJson,
            (Protocol::Raw, Encoding::Custom) => Format::Raw,
            (protocol, encoding) => {
                return Err(ConvertError::UnsupportedPair { protocol, encoding });
            }
        };
        Ok(Self {
            format,
            separator: config.separator.clone(),
        })
    }

    pub fn scope(&self) -> Scope {
        match self.format {
            Format::InfluxLine => Scope::GroupTags,
            Format::SingleJson => Scope::RecordTags,
            Format::Raw => Scope::GroupMetadata,
        }
    }

    pub fn shape(&self) -> Shape {
        match self.format {
            Format::InfluxLine | Format::SingleJson => Shape::Legacy,
            Format::Raw => Shape::Generic,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.format {
            Format::InfluxLine => "text/plain; charset=utf-8",
            Format::SingleJson => "application/json",
            Format::Raw => "application/octet-stream",
        }
    }

    /// Appended after every encoded log when several logs share one body.
    pub fn line_terminator(&self) -> &'static [u8] {
        b"\n"
    }

    pub fn separator(&self) -> Option<&str> {
        self.separator.as_deref()
    }

    /// Encode one legacy log. The result carries no line terminator.
    pub fn encode_log(&self, log: &Log, group: &LogGroup) -> Result<Vec<u8>, ConvertError> {
        match self.format {
            Format::InfluxLine => encode_influx_line(log).map(String::into_bytes),
            Format::SingleJson => encode_single_json(log, group),
            Format::Raw => Err(ConvertError::WrongShape(Shape::Legacy)),
        }
    }

    /// Encode one generic event. Only byte arrays are supported.
    pub fn encode_event(&self, event: &PipelineEvent) -> Result<Bytes, ConvertError> {
        if self.format != Format::Raw {
            return Err(ConvertError::WrongShape(Shape::Generic));
        }
        match event {
            PipelineEvent::ByteArray(data) => Ok(data.clone()),
            other => Err(ConvertError::UnsupportedEvent(other.event_type())),
        }
    }
}

const INFLUX_NAME: &str = "__name__";
const INFLUX_LABELS: &str = "__labels__";
const INFLUX_VALUE: &str = "__value__";
const INFLUX_TIME: &str = "__time_nano__";
const LABEL_PAIR_SEPARATOR: char = '|';
const LABEL_KV_SEPARATOR: &str = "#$#";

/// `name[,label=value...] value=<v>[ <time_nano>]`
fn encode_influx_line(log: &Log) -> Result<String, ConvertError> {
    let name = log
        .content(INFLUX_NAME)
        .filter(|s| !s.is_empty())
        .ok_or(ConvertError::MissingField(INFLUX_NAME))?;
    let value = log
        .content(INFLUX_VALUE)
        .ok_or(ConvertError::MissingField(INFLUX_VALUE))?;
    if value.parse::<f64>().is_err() {
        return Err(ConvertError::InvalidField {
            field: INFLUX_VALUE,
            value: value.to_owned(),
        });
    }

    let mut line = escape_influx(name, &[',', ' ']);
    if let Some(labels) = log.content(INFLUX_LABELS) {
        for pair in labels.split(LABEL_PAIR_SEPARATOR).filter(|p| !p.is_empty()) {
            let Some((k, v)) = pair.split_once(LABEL_KV_SEPARATOR) else {
                return Err(ConvertError::InvalidField {
                    field: INFLUX_LABELS,
                    value: labels.to_owned(),
                });
            };
            let _ = write!(
                line,
                ",{}={}",
                escape_influx(k, &[',', '=', ' ']),
                escape_influx(v, &[',', '=', ' '])
            );
        }
    }
    let _ = write!(line, " value={value}");
    if let Some(time) = log.content(INFLUX_TIME).filter(|s| !s.is_empty()) {
        let _ = write!(line, " {time}");
    }
    Ok(line)
}

fn escape_influx(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Serialize)]
struct SingleLog<'a> {
    contents: BTreeMap<&'a str, &'a str>,
    tags: BTreeMap<&'a str, &'a str>,
    time: u32,
}

const HOST_IP_TAG: &str = "host.ip";
const TOPIC_TAG: &str = "log.topic";

fn encode_single_json(log: &Log, group: &LogGroup) -> Result<Vec<u8>, ConvertError> {
    let mut tags = BTreeMap::new();
    tags.insert(HOST_IP_TAG, group.source.as_str());
    if !group.topic.is_empty() {
        tags.insert(TOPIC_TAG, group.topic.as_str());
    }
    for tag in &group.log_tags {
        tags.insert(strip_tag_prefix(&tag.key), tag.value.as_str());
    }

    let mut contents = BTreeMap::new();
    for content in &log.contents {
        match content.key.strip_prefix(TAG_PREFIX) {
            Some(tag) => tags.insert(tag, content.value.as_str()),
            None => contents.insert(content.key.as_str(), content.value.as_str()),
        };
    }

    let record = SingleLog {
        contents,
        tags,
        time: log.time,
    };
    Ok(serde_json::to_vec(&record)?)
}
