//! Record shapes handed to the flusher by the host pipeline.
//!
//! Two shapes exist: the legacy [`LogGroup`] (key/value logs sharing group
//! tags) and the generic [`PipelineGroupEvents`] (typed events sharing a
//! [`Group`] of metadata and tags).

use std::fmt;

use bytes::Bytes;

/// Prefix marking a tag carried inside log contents or group tags.
pub const TAG_PREFIX: &str = "__tag__:";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContent {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Log {
    /// Seconds since the epoch.
    pub time: u32,
    pub contents: Vec<LogContent>,
}

impl Log {
    pub fn new(contents: &[(&str, &str)]) -> Self {
        Self {
            time: 0,
            contents: contents
                .iter()
                .map(|(k, v)| LogContent {
                    key: (*k).to_owned(),
                    value: (*v).to_owned(),
                })
                .collect(),
        }
    }

    pub fn content(&self, key: &str) -> Option<&str> {
        self.contents
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTag {
    pub key: String,
    pub value: String,
}

/// Legacy batch: logs that share tags, source and topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogGroup {
    pub logs: Vec<Log>,
    pub log_tags: Vec<LogTag>,
    pub source: String,
    pub topic: String,
}

impl LogGroup {
    pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Self {
        self.log_tags.extend(tags.iter().map(|(k, v)| LogTag {
            key: (*k).to_owned(),
            value: (*v).to_owned(),
        }));
        self
    }

    /// Look up a group tag by its bare name, accepting keys stored with or
    /// without [`TAG_PREFIX`].
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.log_tags
            .iter()
            .find(|t| strip_tag_prefix(&t.key) == name)
            .map(|t| t.value.as_str())
    }
}

pub fn strip_tag_prefix(key: &str) -> &str {
    key.strip_prefix(TAG_PREFIX).unwrap_or(key)
}

/// Ordered key/value pairs. Lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues(Vec<(String, String)>);

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Batch-level context shared by every event of a [`PipelineGroupEvents`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub metadata: KeyValues,
    pub tags: KeyValues,
}

impl Group {
    pub fn new(metadata: KeyValues, tags: KeyValues) -> Self {
        Self { metadata, tags }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub timestamp: u64,
    pub tags: KeyValues,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: u64,
    pub body: Bytes,
    pub tags: KeyValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub start_time: u64,
    pub end_time: u64,
    pub tags: KeyValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ByteArray(Bytes),
    Metric(Metric),
    Log(LogEvent),
    Span(Span),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ByteArray,
    Metric,
    Log,
    Span,
}

impl PipelineEvent {
    pub fn byte_array(data: impl Into<Bytes>) -> Self {
        Self::ByteArray(data.into())
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::ByteArray(_) => EventType::ByteArray,
            Self::Metric(_) => EventType::Metric,
            Self::Log(_) => EventType::Log,
            Self::Span(_) => EventType::Span,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::ByteArray => write!(f, "byte_array"),
            EventType::Metric => write!(f, "metric"),
            EventType::Log => write!(f, "log"),
            EventType::Span => write!(f, "span"),
        }
    }
}

/// Generic batch: typed events sharing one [`Group`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineGroupEvents {
    pub group: Group,
    pub events: Vec<PipelineEvent>,
}
