//! One generation: resolve, forward, relay, persist

use super::{FrameSender, GenerationTicket, RelayServices};
use crate::db::DbError;
use crate::normalize::normalize;
use crate::upstream::{UpstreamError, UpstreamRequest, UpstreamStream};
use crate::wire::{ClientFrame, FinalResponse};
use futures::StreamExt;
use thiserror::Error;
use uuid::Uuid;

/// Why the upstream request could not be assembled
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no user id for this connection")]
    MissingUser,
    #[error("invalid project id: {0}")]
    InvalidProjectId(String),
    #[error("no database selected and no project given")]
    MissingDatabase,
    #[error("no database linked to project {0}")]
    UnknownProject(String),
    #[error("project lookup failed: {0}")]
    Lookup(#[from] DbError),
}

/// Failures that end a generation before any payload is relayed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

pub(super) struct Pipeline {
    pub(super) chat_id: String,
    pub(super) identity: Option<String>,
    pub(super) question: String,
    pub(super) frame: ClientFrame,
    pub(super) ticket: GenerationTicket,
    pub(super) services: RelayServices,
    pub(super) frames: FrameSender,
}

enum Ending {
    Completed,
    Interrupted,
}

impl Pipeline {
    /// Drive the generation to its end. The ticket is released on return.
    pub(super) async fn run(self) {
        let token = self.ticket.token().clone();
        let epoch = self.ticket.epoch();

        let opened = tokio::select! {
            biased;

            () = token.cancelled() => None,
            result = self.open_stream() => Some(result),
        };

        let (mut stream, user_id) = match opened {
            None => {
                tracing::info!(chat_id = %self.chat_id, epoch, "Generation interrupted before upstream answered");
                self.frames.send(FinalResponse::interrupted("")).await;
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(chat_id = %self.chat_id, epoch, error = %e, "Generation failed to start");
                self.frames.send(FinalResponse::error(&e)).await;
                return;
            }
            Some(Ok(opened)) => opened,
        };

        let mut answer = String::new();
        let mut relayed = 0usize;
        let ending = loop {
            tokio::select! {
                biased;

                () = token.cancelled() => break Ending::Interrupted,
                next = stream.next() => {
                    let Some(raw) = next else {
                        break Ending::Completed;
                    };
                    let frame = normalize(&raw);
                    if let Some(text) = frame.answer_text() {
                        answer = text.to_string();
                    }
                    if !self.frames.send(frame).await {
                        tracing::debug!(chat_id = %self.chat_id, epoch, "Client writer gone, dropping frame");
                    }
                    relayed += 1;
                }
            }
        };
        drop(stream);

        match ending {
            Ending::Completed if relayed == 0 => {
                tracing::warn!(chat_id = %self.chat_id, epoch, "Upstream closed without a payload");
                self.frames
                    .send(FinalResponse::error("upstream closed without a response"))
                    .await;
            }
            Ending::Completed => {
                tracing::info!(chat_id = %self.chat_id, epoch, relayed, "Generation complete");
            }
            Ending::Interrupted => {
                tracing::info!(chat_id = %self.chat_id, epoch, relayed, "Generation interrupted");
                self.frames.send(FinalResponse::interrupted(&answer)).await;
            }
        }

        // Every frame is queued; free the slot before the write so the next
        // question is not refused while the turn is stored
        drop(self.ticket);

        self.services
            .sink
            .commit(&self.chat_id, &user_id, &self.question, &answer)
            .await;
    }

    /// Resolve identifiers and dial upstream. Yields the stream and the
    /// user the turn belongs to.
    async fn open_stream(&self) -> Result<(UpstreamStream, String), PipelineError> {
        let request = self.resolve_request().await?;
        tracing::debug!(
            chat_id = %self.chat_id,
            database_id = %request.database_id(),
            "Forwarding question upstream"
        );
        let stream = self
            .services
            .upstream
            .forward(&request)
            .await
            .inspect_err(|e| tracing::debug!(kind = ?e.kind, "Upstream forward failed"))?;
        Ok((stream, request.user_id().to_string()))
    }

    async fn resolve_request(&self) -> Result<UpstreamRequest, ResolveError> {
        let user_id = self
            .identity
            .clone()
            .or_else(|| non_empty(self.frame.user_id.as_deref()).map(str::to_string))
            .ok_or(ResolveError::MissingUser)?;

        let database_id = match non_empty(self.frame.database_id.as_deref()) {
            Some(id) => {
                self.remember_project_database(id).await;
                id.to_string()
            }
            None => self.lookup_database().await?,
        };

        Ok(UpstreamRequest::new(
            &self.question,
            self.frame.db_used,
            self.frame.docs_used,
            database_id,
            user_id,
            self.chat_id.as_str(),
        ))
    }

    /// A frame naming both its project and database teaches the directory
    /// the mapping later project-only frames resolve through
    async fn remember_project_database(&self, database_id: &str) {
        let Some(project_id) = non_empty(self.frame.project_id.as_deref())
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(|id| id.to_string())
        else {
            return;
        };
        if let Err(e) = self
            .services
            .directory
            .link_project_database(&project_id, database_id)
            .await
        {
            tracing::warn!(chat_id = %self.chat_id, project_id = %project_id, error = %e, "Failed to record project database");
        }
    }

    async fn lookup_database(&self) -> Result<String, ResolveError> {
        let raw = non_empty(self.frame.project_id.as_deref()).ok_or(ResolveError::MissingDatabase)?;
        let project_id = Uuid::parse_str(raw)
            .map_err(|_| ResolveError::InvalidProjectId(raw.to_string()))?
            .to_string();

        let database_id = self
            .services
            .directory
            .database_id_for_project(&project_id)
            .await?;
        database_id.ok_or(ResolveError::UnknownProject(project_id))
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}
