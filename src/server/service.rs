//! Request boundary between the socket transport and the pipeline
//!
//! Validates requests before any model runs, bounds how many questions run
//! inference at once, and logs completed exchanges to the conversation store.

use crate::config::RetrievalConfig;
use crate::error::{QueryMindError, Result};
use crate::retrieval::{FinalAnswer, PipelineStats, RetrievalReadingPipeline};
use crate::server::ipc::{IpcRequest, IpcResponse};
use crate::storage::{ConversationStore, NewMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A question as received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Number of passages to retrieve; the configured default when absent
    #[serde(default)]
    pub k: Option<usize>,
    /// With `user_id`, the conversation the exchange is logged to
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            k: None,
            conversation_id: None,
            user_id: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Check field constraints and resolve the effective `k`
    pub fn validate(&self, retrieval: &RetrievalConfig) -> Result<usize> {
        if self.question.trim().is_empty() {
            return Err(QueryMindError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let k = self.k.unwrap_or(retrieval.default_k);
        if k == 0 {
            return Err(QueryMindError::InvalidInput(
                "k must be at least 1".to_string(),
            ));
        }
        if k > retrieval.max_k {
            return Err(QueryMindError::InvalidInput(format!(
                "k must be at most {}, got {}",
                retrieval.max_k, k
            )));
        }

        Ok(k)
    }
}

/// The answer returned to a client
pub type AskResponse = FinalAnswer;

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(flatten)]
    pub stats: PipelineStats,
}

/// Question answering plus conversation bookkeeping, shared by every
/// connection
pub struct QaService {
    pipeline: RetrievalReadingPipeline,
    store: Arc<dyn ConversationStore>,
    retrieval: RetrievalConfig,
    inference_permits: Semaphore,
}

impl QaService {
    pub fn new(
        pipeline: RetrievalReadingPipeline,
        store: Arc<dyn ConversationStore>,
        retrieval: RetrievalConfig,
        max_concurrent_inferences: usize,
    ) -> Self {
        Self {
            pipeline,
            store,
            retrieval,
            inference_permits: Semaphore::new(max_concurrent_inferences.max(1)),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Validate and answer one question
    ///
    /// Inference runs on the blocking pool once a permit is free. A failure
    /// (or panic) inside the pipeline fails only this request.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let k = request.validate(&self.retrieval)?;

        let answer = {
            let _permit = self
                .inference_permits
                .acquire()
                .await
                .map_err(|_| QueryMindError::Server("Inference pool closed".to_string()))?;

            let pipeline = self.pipeline.clone();
            let question = request.question.clone();
            tokio::task::spawn_blocking(move || pipeline.ask(&question, k))
                .await
                .map_err(|e| QueryMindError::Server(format!("Inference task failed: {}", e)))??
        };

        self.record_exchange(&request, &answer);

        Ok(answer)
    }

    /// Append the exchange to its conversation. Storage failures never fail
    /// the answer.
    fn record_exchange(&self, request: &AskRequest, answer: &FinalAnswer) {
        let (Some(conversation_id), Some(user_id)) = (&request.conversation_id, &request.user_id)
        else {
            return;
        };

        let message = NewMessage {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            question: answer.question.clone(),
            answer: answer.answer.clone(),
            confidence: Some(answer.confidence_logit),
        };

        if let Err(e) = self.store.append_message(message) {
            tracing::warn!(
                "Failed to record exchange in conversation {}: {}",
                conversation_id,
                e
            );
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            stats: self.pipeline.stats(),
        }
    }

    /// Dispatch one socket request. `Shutdown` is acknowledged here; stopping
    /// the listener is the server's job.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ask(ask) => respond(self.ask(ask).await),
            IpcRequest::Health => respond(Ok(self.health())),
            IpcRequest::ListConversations { user_id } => {
                respond(self.store.list_conversations(&user_id).map_err(Into::into))
            }
            IpcRequest::CreateConversation { user_id, title } => respond(
                self.store
                    .create_conversation(&user_id, title.as_deref())
                    .map_err(Into::into),
            ),
            IpcRequest::RenameConversation {
                conversation_id,
                title,
            } => respond(
                self.store
                    .rename_conversation(&conversation_id, &title)
                    .map_err(Into::into),
            ),
            IpcRequest::DeleteConversation { conversation_id } => {
                match self.store.delete_conversation(&conversation_id) {
                    Ok(()) => IpcResponse::success("Conversation deleted"),
                    Err(e) => IpcResponse::error(e.to_string()),
                }
            }
            IpcRequest::ListMessages { conversation_id } => {
                respond(self.store.list_messages(&conversation_id).map_err(Into::into))
            }
            IpcRequest::SaveMessage(message) => {
                respond(self.store.append_message(message).map_err(Into::into))
            }
            IpcRequest::Shutdown => IpcResponse::success("Shutdown initiated"),
        }
    }
}

/// Turn an operation result into a response, logging internal failures
fn respond<T: Serialize>(result: Result<T>) -> IpcResponse {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(data) => IpcResponse::success_with_data(data),
            Err(e) => IpcResponse::error(format!("Failed to serialize response: {}", e)),
        },
        Err(e) => {
            if e.is_input_error() {
                tracing::debug!("Rejected request: {}", e);
            } else {
                tracing::error!("Request failed: {}", e);
            }
            IpcResponse::error(e.to_string())
        }
    }
}
