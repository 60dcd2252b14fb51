//! Per-request relay state: validation, history resolution, prompt assembly,
//! text accumulation and the commit of the rolling window.
//!
//! A `RelayExchange` is owned by the task handling one request and is never
//! shared; the only shared state a relay touches is the conversation store.

use thiserror::Error;

use crate::attachments::{Attachment, AttachmentError, PreparedAttachments};
use crate::conversation::{
    ConversationStore, DEFAULT_HISTORY_WINDOW, StoreError, committed_window, history_tail,
};
use crate::llm::LlmGatewayRequest;
use crate::models::{GenerateRequest, StreamGenerateRequest, Turn};
use crate::prompts::{FeatureMode, assemble_messages};

/// Stored in place of the user's text when a request carried only attachments.
pub const ATTACHMENT_ONLY_MARKER: &str = "[attachment sent]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Received,
    Assembling,
    Streaming,
    Completed,
    Failed,
}

impl RelayPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Assembling => "assembling",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Assembling)
                | (Self::Assembling, Self::Streaming)
                | (Self::Streaming, Self::Completed)
                | (Self::Received | Self::Assembling | Self::Streaming, Self::Failed)
        )
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Input is required")]
    EmptyRequest,
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error("conversation store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("relay cannot move from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: RelayPhase, to: RelayPhase },
}

#[derive(Debug, Clone, Default)]
pub struct RelayInput {
    pub feature: Option<String>,
    pub input: String,
    pub conversation_id: Option<String>,
    pub conversation_history: Vec<Turn>,
    pub attachments: Vec<Attachment>,
}

impl From<GenerateRequest> for RelayInput {
    fn from(request: GenerateRequest) -> Self {
        Self {
            feature: request.feature,
            input: request.input,
            conversation_id: request.conversation_id,
            conversation_history: request.conversation_history,
            attachments: Vec::new(),
        }
    }
}

impl From<StreamGenerateRequest> for RelayInput {
    fn from(request: StreamGenerateRequest) -> Self {
        Self {
            feature: request.feature,
            input: request.input,
            conversation_id: request.conversation_id,
            conversation_history: request.conversation_history,
            attachments: request
                .attachments
                .into_iter()
                .map(Attachment::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationCommit {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug)]
pub struct RelayExchange {
    phase: RelayPhase,
    mode: FeatureMode,
    raw_input: String,
    conversation_id: Option<String>,
    caller_history: Vec<Turn>,
    attachments: Vec<Attachment>,
    attachment_count: usize,
    prior_history: Vec<Turn>,
    stored_user_text: String,
    accumulated: String,
}

impl RelayExchange {
    pub fn receive(input: RelayInput) -> Result<Self, RelayError> {
        if input.input.trim().is_empty() && input.attachments.is_empty() {
            return Err(RelayError::EmptyRequest);
        }

        let conversation_id = input
            .conversation_id
            .filter(|conversation_id| !conversation_id.is_empty());

        Ok(Self {
            phase: RelayPhase::Received,
            mode: FeatureMode::resolve(input.feature.as_deref()),
            raw_input: input.input,
            conversation_id,
            caller_history: input.conversation_history,
            attachment_count: input.attachments.len(),
            attachments: input.attachments,
            prior_history: Vec::new(),
            stored_user_text: String::new(),
            accumulated: String::new(),
        })
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn mode(&self) -> FeatureMode {
        self.mode
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    /// Picks the prompt history: the caller's when non-empty, otherwise the
    /// stored window for the conversation id, otherwise nothing.
    pub async fn resolve_history(
        &mut self,
        store: &dyn ConversationStore,
    ) -> Result<(), RelayError> {
        let history = if !self.caller_history.is_empty() {
            std::mem::take(&mut self.caller_history)
        } else if let Some(conversation_id) = self.conversation_id.as_deref() {
            store.load(conversation_id).await?.unwrap_or_default()
        } else {
            Vec::new()
        };

        self.prior_history = history_tail(&history, DEFAULT_HISTORY_WINDOW);
        Ok(())
    }

    pub fn take_attachments(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.attachments)
    }

    pub fn assemble(
        &mut self,
        prepared: PreparedAttachments,
    ) -> Result<LlmGatewayRequest, RelayError> {
        self.advance(RelayPhase::Assembling)?;

        let prompt_text = format!("{}{}", self.raw_input, prepared.augmented_text);
        let messages = assemble_messages(
            self.mode,
            &prompt_text,
            &self.prior_history,
            &prepared.image_refs,
        );

        let stored_input = if self.raw_input.trim().is_empty() {
            ATTACHMENT_ONLY_MARKER
        } else {
            self.raw_input.as_str()
        };
        self.stored_user_text = format!("{stored_input}{}", prepared.augmented_text);

        Ok(LlmGatewayRequest::new(self.mode, messages))
    }

    pub fn begin_streaming(&mut self) -> Result<(), RelayError> {
        self.advance(RelayPhase::Streaming)
    }

    pub fn record_fragment(&mut self, fragment: &str) {
        self.accumulated.push_str(fragment);
    }

    pub fn complete(&mut self) -> Result<Option<ConversationCommit>, RelayError> {
        self.advance(RelayPhase::Completed)?;

        let Some(conversation_id) = self.conversation_id.clone() else {
            return Ok(None);
        };

        Ok(Some(ConversationCommit {
            conversation_id,
            turns: committed_window(
                &self.prior_history,
                DEFAULT_HISTORY_WINDOW,
                Turn::user(self.stored_user_text.clone()),
                Turn::assistant(self.accumulated.clone()),
            ),
        }))
    }

    pub fn fail(&mut self) {
        if self.phase.can_advance_to(RelayPhase::Failed) {
            self.phase = RelayPhase::Failed;
        }
    }

    fn advance(&mut self, next: RelayPhase) -> Result<(), RelayError> {
        if !self.phase.can_advance_to(next) {
            return Err(RelayError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}
