//! Trait abstractions for runtime I/O
//!
//! These traits let the dispatcher and pipeline run against mock
//! collaborators in tests.

use crate::db::{Database, DbError, Sender};
use crate::upstream::{UpstreamError, UpstreamRequest, UpstreamStream, WsForwarder};
use async_trait::async_trait;
use axum::http::HeaderMap;

/// Resolves the opaque user id of the connection's session
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn user_id(&self, headers: &HeaderMap) -> Option<String>;
}

/// Maps a project to the database its questions run against
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn database_id_for_project(&self, project_id: &str) -> Result<Option<String>, DbError>;

    /// Remember the database a project's question ran against
    async fn link_project_database(&self, project_id: &str, database_id: &str)
        -> Result<(), DbError>;
}

/// Storage for chat turns
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, chat_id: &str, sender: Sender, content: &str)
        -> Result<(), DbError>;

    async fn update_last_activity(&self, chat_id: &str) -> Result<(), DbError>;

    /// Store the question, then the answer, then bump last activity.
    /// `user_id` owns the chat when the store creates it on first use.
    async fn record_turn(
        &self,
        chat_id: &str,
        _user_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), DbError> {
        self.insert_message(chat_id, Sender::You, question).await?;
        self.insert_message(chat_id, Sender::Ai, answer).await?;
        self.update_last_activity(chat_id).await
    }
}

/// Client for the generation backend
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn forward(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError>;
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Reads the user id from a trusted header set by the session layer in front
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn user_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Adapter to use Database as the turn store and project directory
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn insert_message(
        &self,
        chat_id: &str,
        sender: Sender,
        content: &str,
    ) -> Result<(), DbError> {
        self.db.insert_message(chat_id, sender, content).map(|_| ())
    }

    async fn update_last_activity(&self, chat_id: &str) -> Result<(), DbError> {
        self.db.update_last_activity(chat_id)
    }

    async fn record_turn(
        &self,
        chat_id: &str,
        user_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), DbError> {
        self.db.record_turn(chat_id, user_id, question, answer)
    }
}

#[async_trait]
impl ProjectDirectory for DatabaseStorage {
    async fn database_id_for_project(&self, project_id: &str) -> Result<Option<String>, DbError> {
        self.db.database_id_for_project(project_id)
    }

    async fn link_project_database(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> Result<(), DbError> {
        self.db.link_project_database(project_id, database_id)
    }
}

#[async_trait]
impl UpstreamClient for WsForwarder {
    async fn forward(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError> {
        WsForwarder::forward(self, request).await
    }
}
