//! Headless Console — adapts an agent's I/O
//! surface into typed `JobEvent`s. Every call blocks until its append is
//! durable; a confirmation prompt is answered immediately with a
//! deterministic default decision rather than blocking the agent.

use std::sync::Arc;

use brokkctl_common::{ConfirmDecision, ConfirmOptionType, EventPayload, NotificationLevel};

use crate::store::{JobEventStore, StoreError};

pub struct HeadlessConsole {
    store: Arc<JobEventStore>,
    job_id: String,
}

impl HeadlessConsole {
    pub fn new(store: Arc<JobEventStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    pub async fn llm_token(
        &self,
        token: impl Into<String>,
        message_type: impl Into<String>,
        is_new_message: bool,
        is_reasoning: bool,
    ) -> Result<i64, StoreError> {
        self.emit(EventPayload::LlmToken {
            token: token.into(),
            message_type: message_type.into(),
            is_new_message,
            is_reasoning,
        })
        .await
    }

    pub async fn notify(
        &self,
        level: NotificationLevel,
        message: impl Into<String>,
        title: Option<String>,
    ) -> Result<i64, StoreError> {
        self.emit(EventPayload::Notification {
            level,
            message: message.into(),
            title,
        })
        .await
    }

    pub async fn error(&self, message: impl Into<String>, title: impl Into<String>) -> Result<i64, StoreError> {
        self.emit(EventPayload::Error {
            message: message.into(),
            title: title.into(),
        })
        .await
    }

    pub async fn context_baseline(&self, count: u64, snippet: impl Into<String>) -> Result<i64, StoreError> {
        self.emit(EventPayload::ContextBaseline {
            count,
            snippet: snippet.into(),
        })
        .await
    }

    pub async fn state_hint(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        details: Option<String>,
        count: Option<u64>,
    ) -> Result<i64, StoreError> {
        self.emit(EventPayload::StateHint {
            name: name.into(),
            value: value.into(),
            details,
            count,
        })
        .await
    }

    /// A headless confirmation cannot block the agent: records the prompt
    /// and returns the option type's deterministic default immediately.
    pub async fn confirm(
        &self,
        message: impl Into<String>,
        title: impl Into<String>,
        option_type: ConfirmOptionType,
        message_type: impl Into<String>,
    ) -> Result<ConfirmDecision, StoreError> {
        let decision = option_type.default_decision();
        self.emit(EventPayload::ConfirmRequest {
            message: message.into(),
            title: title.into(),
            option_type,
            message_type: message_type.into(),
            default_decision: decision,
        })
        .await?;
        Ok(decision)
    }

    async fn emit(&self, payload: EventPayload) -> Result<i64, StoreError> {
        self.store.append_event(&self.job_id, payload).await
    }
}
