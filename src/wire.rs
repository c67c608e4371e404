//! Client-facing wire format
//!
//! Frames exchanged with the browser over the chat WebSocket. Field names are
//! fixed by deployed clients, including the legacy aliases (`message`,
//! `response`, `geoJSON`) older builds still read.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Status text sent as the final frame of an interrupted generation
pub const INTERRUPTED_STATUS: &str = "Generation interrupted by user.";

/// A decoded client message
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub question: Option<String>,
    /// Legacy field name for `question`
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "dbUsed")]
    pub db_used: bool,
    #[serde(default, rename = "docsUsed")]
    pub docs_used: bool,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub interrupt: bool,
}

/// What a client frame asks the relay to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Interrupt,
    Question(String),
    Noop,
}

#[derive(Debug, Error)]
#[error("malformed client frame: {0}")]
pub struct FrameError(#[from] serde_json::Error);

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Question text, preferring `question` over the legacy `message`
    pub fn question_text(&self) -> Option<&str> {
        non_empty(self.question.as_deref()).or_else(|| non_empty(self.message.as_deref()))
    }

    pub fn kind(&self) -> FrameKind {
        if self.interrupt {
            return FrameKind::Interrupt;
        }
        match self.question_text() {
            Some(text) => FrameKind::Question(text.to_string()),
            None => FrameKind::Noop,
        }
    }
}

/// Label → fragment, kept in the order the upstream emitted the labels.
///
/// Fragments stay exactly as the upstream sent them, whatever their shape;
/// only the merge step looks inside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoObjectSet(Vec<(String, Value)>);

impl GeoObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, fragment: Value) {
        self.0.push((label.into(), fragment));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(label, fragment)| (label.as_str(), fragment))
    }
}

impl Serialize for GeoObjectSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, fragment) in &self.0 {
            map.serialize_entry(label, fragment)?;
        }
        map.end()
    }
}

/// The canonical outbound client frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Mirror of `answer` for older clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(rename = "geoJSON", skip_serializing_if = "Option::is_none")]
    pub geo_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_objects: Option<GeoObjectSet>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl FinalResponse {
    pub fn status(text: impl Into<String>) -> Self {
        Self::default().with_status(text)
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::status(format!("Error: {message}"))
    }

    /// Final frame of an interrupted generation, carrying any partial answer
    pub fn interrupted(partial_answer: &str) -> Self {
        Self {
            interrupted: true,
            ..Self::status(INTERRUPTED_STATUS)
        }
        .with_answer(partial_answer)
    }

    /// Sets the status; empty text leaves the field unset
    #[must_use]
    pub fn with_status(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.status = (!text.is_empty()).then_some(text);
        self
    }

    /// Sets `answer` and its `response` mirror; empty text leaves both unset
    #[must_use]
    pub fn with_answer(mut self, text: &str) -> Self {
        if !text.is_empty() {
            self.answer = Some(text.to_string());
            self.response = Some(text.to_string());
        }
        self
    }

    /// Non-empty answer text, if this frame is terminal for persistence
    pub fn answer_text(&self) -> Option<&str> {
        non_empty(self.answer.as_deref()).or_else(|| non_empty(self.response.as_deref()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}
