//! Fragments: the unit of conversational memory.
//!
//! A [`Fragment`] is immutable once created. Compaction never edits one in
//! place; it replaces a group of fragments with a new fragment whose
//! `source_refs` records every original it stands for.
//!
//! [`RawFragment`] is the loosely-typed ingestion shape. Anything can arrive
//! over the wire (missing content, `null`, numbers where text belongs), so
//! validation is a separate, fallible step.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::ValidationError;

/// A validated memory fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Unique ID for this fragment
    pub id: String,

    /// The text content
    pub content: String,

    /// When this fragment was created
    pub created_at: DateTime<Utc>,

    /// Optional embedding vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Ids of the original fragments this one replaces (empty = stands for itself)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub source_refs: BTreeSet<String>,
}

impl Fragment {
    /// Create a fresh fragment with a random id, stamped now.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            created_at: Utc::now(),
            embedding: None,
            source_refs: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Whether this fragment is the product of compaction.
    pub fn is_compacted(&self) -> bool {
        !self.source_refs.is_empty()
    }

    /// The original fragment ids this fragment accounts for.
    pub fn provenance(&self) -> Vec<String> {
        if self.source_refs.is_empty() {
            vec![self.id.clone()]
        } else {
            self.source_refs.iter().cloned().collect()
        }
    }
}

/// An unvalidated fragment as received from a caller or a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub source_refs: BTreeSet<String>,
}

impl RawFragment {
    /// A raw fragment carrying plain text content.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(Value::String(content.into())),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Leniently extract a raw fragment from an arbitrary JSON value.
    ///
    /// Never fails: fields of the wrong shape are dropped, and `content` is
    /// kept as-is so that [`RawFragment::validate`] can classify it. Accepts
    /// `timestamp` (unix seconds or RFC 3339) as an alias of `created_at`.
    pub fn from_json(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self {
                content: Some(value.clone()),
                ..Default::default()
            };
        };

        let id = obj.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let created_at = obj
            .get("created_at")
            .or_else(|| obj.get("timestamp"))
            .and_then(parse_timestamp);

        let embedding = obj.get("embedding").and_then(|v| {
            v.as_array()?
                .iter()
                .map(|x| x.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
        });

        let source_refs = obj
            .get("source_refs")
            .and_then(Value::as_array)
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id,
            content: obj.get("content").cloned(),
            created_at,
            embedding,
            source_refs,
        }
    }

    /// Validate into a [`Fragment`].
    ///
    /// Missing ids get a fresh UUID and missing timestamps default to `now`.
    /// Empty or non-finite embeddings are dropped rather than rejected.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Fragment, ValidationError> {
        let content = match &self.content {
            None | Some(Value::Null) => return Err(ValidationError::MissingContent),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(ValidationError::EmptyContent);
            }
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(ValidationError::WrongContentType(json_type_name(other))),
        };

        let id = match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        let embedding = self
            .embedding
            .as_ref()
            .filter(|e| !e.is_empty() && e.iter().all(|x| x.is_finite()))
            .cloned();

        Ok(Fragment {
            id,
            content,
            created_at: self.created_at.unwrap_or(now),
            embedding,
            source_refs: self.source_refs.clone(),
        })
    }
}

impl From<Fragment> for RawFragment {
    fn from(fragment: Fragment) -> Self {
        Self {
            id: Some(fragment.id),
            content: Some(Value::String(fragment.content)),
            created_at: Some(fragment.created_at),
            embedding: fragment.embedding,
            source_refs: fragment.source_refs,
        }
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            Utc.timestamp_opt(whole, nanos).single()
        }
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
