//! Extra side-channel topics
//!
//! Callers declare which additional topics to collect and which typed fields
//! to pull from each message. The declaration is resolved into column keys and
//! extractor functions once, before the log is read.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Type of an extracted field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Float,
    Integer,
    Bool,
}

impl FieldKind {
    fn extractor(self) -> fn(&serde_json::Value) -> Option<ExtraValue> {
        match self {
            FieldKind::Float => |v: &serde_json::Value| v.as_f64().map(ExtraValue::Float),
            FieldKind::Integer => |v: &serde_json::Value| v.as_i64().map(ExtraValue::Integer),
            FieldKind::Bool => |v: &serde_json::Value| v.as_bool().map(ExtraValue::Bool),
        }
    }
}

impl std::str::FromStr for FieldKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float" | "f64" => Ok(FieldKind::Float),
            "integer" | "int" | "i64" => Ok(FieldKind::Integer),
            "bool" => Ok(FieldKind::Bool),
            other => Err(AnalysisError::InvalidOptions(format!(
                "unknown field kind '{}'",
                other
            ))),
        }
    }
}

/// One field to extract from an extra topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Extracted field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExtraValue {
    Float(f64),
    Integer(i64),
    Bool(bool),
}

/// Column key of an extra field: `e` + topic with `/` replaced by `_` + `_` + field
pub fn column_key(topic: &str, field: &str) -> String {
    format!("e{}_{}", topic.replace('/', "_"), field)
}

/// Declared extra topics, keyed by topic name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraTopics {
    topics: BTreeMap<String, Vec<FieldSpec>>,
}

impl ExtraTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add fields to collect from `topic`
    pub fn with_topic(mut self, topic: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        self.topics.entry(topic.into()).or_default().extend(fields);
        self
    }

    /// Add a declaration of the form `topic:field:kind`
    pub fn add_declaration(&mut self, declaration: &str) -> Result<(), AnalysisError> {
        let mut parts = declaration.rsplitn(3, ':');
        let (kind, field, topic) = match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(field), Some(topic)) if !topic.is_empty() && !field.is_empty() => {
                (kind, field, topic)
            }
            _ => {
                return Err(AnalysisError::InvalidOptions(format!(
                    "extra topic must be topic:field:kind, got '{}'",
                    declaration
                )))
            }
        };
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(FieldSpec::new(field, kind.parse()?));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// Resolve the declaration into column keys and extractors
    pub fn resolve(&self) -> ExtraChannels {
        let mut columns = Vec::new();
        let mut channels = HashMap::new();

        for (topic, fields) in &self.topics {
            let resolved: Vec<ResolvedField> = fields
                .iter()
                .map(|f| ResolvedField {
                    name: f.name.clone(),
                    column: column_key(topic, &f.name),
                    extract: f.kind.extractor(),
                })
                .collect();
            columns.extend(resolved.iter().map(|f| f.column.clone()));
            channels.insert(topic.clone(), resolved);
        }

        ExtraChannels { columns, channels }
    }
}

struct ResolvedField {
    name: String,
    column: String,
    extract: fn(&serde_json::Value) -> Option<ExtraValue>,
}

/// Resolved extractors for the declared extra topics
pub struct ExtraChannels {
    columns: Vec<String>,
    channels: HashMap<String, Vec<ResolvedField>>,
}

impl ExtraChannels {
    pub fn contains(&self, topic: &str) -> bool {
        self.channels.contains_key(topic)
    }

    /// All column keys, in declaration order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Extract the declared fields of one message.
    ///
    /// Returns `None` if the topic was not declared. Missing or mistyped
    /// fields are `None` in the returned map.
    pub fn extract(
        &self,
        topic: &str,
        msg: &serde_json::Value,
    ) -> Option<BTreeMap<String, Option<ExtraValue>>> {
        let fields = self.channels.get(topic)?;
        Some(
            fields
                .iter()
                .map(|f| {
                    let value = msg.get(&f.name).and_then(f.extract);
                    (f.column.clone(), value)
                })
                .collect(),
        )
    }
}
