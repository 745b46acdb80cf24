//! Batch structure handed over by the ingestion step and written back with
//! summaries attached. Unknown keys are preserved as-is, and entries of the
//! wrong shape are kept verbatim so they can be skipped rather than rejected.

use serde::ser::{Error as _, SerializeMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::time::Duration;

use crate::content::SummaryBasis;
use crate::llm::SummaryOutcome;

/// Either a well-formed entry or the raw JSON that failed to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry<T> {
    Valid(T),
    Invalid(Value),
}

impl<T> Entry<T> {
    pub fn valid(&self) -> Option<&T> {
        match self {
            Entry::Valid(v) => Some(v),
            Entry::Invalid(_) => None,
        }
    }

    pub fn valid_mut(&mut self) -> Option<&mut T> {
        match self {
            Entry::Valid(v) => Some(v),
            Entry::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Entry<Vec<Entry<SourceGroup>>>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Batch {
    pub fn groups(&self) -> impl Iterator<Item = &SourceGroup> {
        self.results
            .as_ref()
            .and_then(Entry::valid)
            .into_iter()
            .flatten()
            .filter_map(Entry::valid)
    }

    /// Number of items the coordinator will visit.
    pub fn pending_items(&self) -> usize {
        self.groups()
            .filter(|g| !g.is_marked_failed())
            .filter_map(|g| g.items.as_ref().and_then(Entry::valid))
            .map(Vec::len)
            .sum()
    }
}

/// One feed/channel worth of items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub source_type: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub source_title: Option<Value>,
    /// `false` when ingestion already failed for this source
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Entry<Vec<Entry<BatchItem>>>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceGroup {
    pub fn is_marked_failed(&self) -> bool {
        matches!(self.success, Some(Value::Bool(false)))
    }

    pub fn display_title(&self) -> Cow<'_, str> {
        match self.source_title.as_ref() {
            None | Some(Value::Null) => Cow::Borrowed("Unknown"),
            title => text(title),
        }
    }
}

/// One link of a source group.
///
/// `title`, `url` and `published` keep whatever JSON the ingestion step
/// wrote, so an object with an odd scalar type is still summarized. The
/// record is never read back from input: its keys stay in `extra` until
/// the item is processed, and on output the record's keys win over them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BatchItem {
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub url: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub published: Option<Value>,
    #[serde(skip)]
    pub record: Option<SummaryRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BatchItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: Some(Value::String(title.into())),
            url: Some(Value::String(url.into())),
            ..Default::default()
        }
    }

    pub fn url(&self) -> Cow<'_, str> {
        text(self.url.as_ref())
    }

    pub fn title(&self) -> Cow<'_, str> {
        text(self.title.as_ref())
    }

    pub fn published(&self) -> Cow<'_, str> {
        text(self.published.as_ref())
    }
}

impl Serialize for BatchItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = match &self.record {
            Some(record) => match serde_json::to_value(record).map_err(S::Error::custom)? {
                Value::Object(fields) => fields,
                _ => Map::new(),
            },
            None => Map::new(),
        };

        let mut map = serializer.serialize_map(None)?;
        let known = [("title", &self.title), ("url", &self.url), ("published", &self.published)];
        for (key, value) in known {
            if let Some(value) = value {
                map.serialize_entry(key, value)?;
            }
        }
        for (key, value) in self.extra.iter().filter(|(key, _)| !record.contains_key(*key)) {
            map.serialize_entry(key, value)?;
        }
        for (key, value) in &record {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)` so it is written back.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Text form of a loosely typed field: strings are trimmed, other scalars
/// use their JSON rendering, missing and null are empty.
fn text(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s.trim()),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

/// Fields attached to an item once it has been processed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Wall-clock time, formatted like `12.3s`
    pub processing_time: String,
    pub model_used: String,
    pub tokens_consumed: u64,
    pub brief: String,
    pub summary: String,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_basis: Option<SummaryBasis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SummaryRecord {
    pub fn from_outcome(outcome: SummaryOutcome, elapsed: Duration) -> Self {
        Self {
            processing_time: format_elapsed(elapsed),
            model_used: outcome.model_used,
            tokens_consumed: outcome.tokens_consumed,
            brief: outcome.brief,
            summary: outcome.summary,
            success: outcome.success,
            error: outcome.error,
            warning: outcome.warning,
            ..Default::default()
        }
    }

    /// Failure recorded without any provider call.
    pub fn rejected(model_used: impl Into<String>, error: impl Into<String>) -> Self {
        Self::from_outcome(SummaryOutcome::failed(model_used, 0, error), Duration::ZERO)
    }

    /// Append `warning` to any warning already present.
    pub fn add_warning(&mut self, warning: Option<String>) {
        self.warning = match (self.warning.take(), warning) {
            (Some(a), Some(b)) => Some(format!("{}; {}", b, a)),
            (a, b) => b.or(a),
        };
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}
