//! Upstream request types

use serde::Serialize;

/// The payload sent once per generation as the first upstream frame.
///
/// The question is duplicated under `message` for older backend revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamRequest {
    question: String,
    message: String,
    #[serde(rename = "dbUsed")]
    db_used: bool,
    #[serde(rename = "docsUsed")]
    docs_used: bool,
    database_id: String,
    user_id: String,
    chat_id: String,
}

impl UpstreamRequest {
    pub fn new(
        question: &str,
        db_used: bool,
        docs_used: bool,
        database_id: impl Into<String>,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            question: question.to_string(),
            message: question.to_string(),
            db_used,
            docs_used,
            database_id: database_id.into(),
            user_id: user_id.into(),
            chat_id: chat_id.into(),
        }
    }

    #[cfg(test)]
    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}
