use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use voxcal_browser::{
    BrowserExecutor, DisplayMode, LoginGuidance, LoginPoll, ModeTransition,
    SharedSessionController,
};
use voxcal_core::current_unix_timestamp;
use voxcal_slots::{
    guidance_for_missing, ConversationStore, ExtractionPayload, ScheduleRequest,
    ScheduleRequestError, SlotField,
};

pub const LOGIN_REQUIRED_MESSAGE: &str = "Please log in to your calendar first.";
pub const END_BEFORE_START_MESSAGE: &str = "The end time must be after the start time.";
pub const CREATE_FAILED_MESSAGE: &str =
    "Sorry, I couldn't save the event to your calendar. Please try again.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Result of one scheduling turn, ready to be spoken back.
pub struct TurnOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ScheduleRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_transition: Option<ModeTransition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<SlotField>,
}

impl TurnOutcome {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            event: None,
            mode_transition: None,
            missing: Vec::new(),
        }
    }
}

/// Drives slot filling, conflict checks, and event creation for conversations.
pub struct SchedulingAssistant<E: BrowserExecutor> {
    session: SharedSessionController<E>,
    conversations: Arc<AsyncMutex<ConversationStore>>,
    preferred_mode: DisplayMode,
}

impl<E: BrowserExecutor> Clone for SchedulingAssistant<E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            conversations: Arc::clone(&self.conversations),
            preferred_mode: self.preferred_mode,
        }
    }
}

impl<E: BrowserExecutor> SchedulingAssistant<E> {
    pub fn new(
        session: SharedSessionController<E>,
        conversations: ConversationStore,
        preferred_mode: DisplayMode,
    ) -> Self {
        Self {
            session,
            conversations: Arc::new(AsyncMutex::new(conversations)),
            preferred_mode,
        }
    }

    pub fn session(&self) -> &SharedSessionController<E> {
        &self.session
    }

    /// Resumes the calendar session on first use. Errors only when the browser cannot start.
    pub async fn ensure_session(&self) -> Result<bool, voxcal_browser::CalendarSessionError> {
        self.session.ensure_session(self.preferred_mode).await
    }

    pub async fn start_manual_login(&self) -> Result<LoginGuidance, voxcal_browser::CalendarSessionError> {
        self.session.start_manual_login().await
    }

    pub async fn poll_login(&self) -> LoginPoll {
        self.session.poll_login_status().await
    }

    /// Grounding text for the extraction oracle's next call.
    pub async fn extraction_hint(&self, conversation_id: &str) -> String {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|context| context.describe_for_extraction_hint())
            .unwrap_or_default()
    }

    pub async fn reset_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.lock().await.evict(conversation_id)
    }

    pub async fn evict_idle_conversations(&self) -> usize {
        self.conversations
            .lock()
            .await
            .evict_expired(current_unix_timestamp())
    }

    pub async fn handle_turn(&self, conversation_id: &str, payload: &ExtractionPayload) -> TurnOutcome {
        self.handle_turn_at(conversation_id, payload, current_unix_timestamp())
            .await
    }

    /// One scheduling turn with an explicit clock.
    pub async fn handle_turn_at(
        &self,
        conversation_id: &str,
        payload: &ExtractionPayload,
        now_unix: u64,
    ) -> TurnOutcome {
        let (request, missing) = {
            let mut conversations = self.conversations.lock().await;
            let context = conversations.get_or_open(conversation_id, now_unix);
            let partial = payload.to_partial_slot(context.known_date());
            let request = context.merge(partial);
            (request, context.missing_fields())
        };

        match self.ensure_session().await {
            Ok(true) => {}
            Ok(false) => {
                return TurnOutcome {
                    missing,
                    ..TurnOutcome::failure(LOGIN_REQUIRED_MESSAGE)
                };
            }
            Err(error) => {
                tracing::warn!(code = error.code(), error = %error, "calendar session unavailable");
                return TurnOutcome::failure(error.user_message());
            }
        }

        let Some(request) = request else {
            tracing::debug!(conversation_id, ?missing, "scheduling request incomplete");
            return TurnOutcome {
                missing: missing.clone(),
                ..TurnOutcome::failure(guidance_for_missing(&missing))
            };
        };

        if let Err(error) = request.validate() {
            tracing::debug!(conversation_id, error = %error, "rejecting scheduling request");
            self.reschedule(conversation_id).await;
            let message = match error {
                ScheduleRequestError::EndNotAfterStart { .. } => END_BEFORE_START_MESSAGE,
                ScheduleRequestError::EmptyTitle | ScheduleRequestError::DateMismatch { .. } => {
                    "I couldn't understand that"
                }
            };
            return TurnOutcome {
                missing: vec![SlotField::Time],
                ..TurnOutcome::failure(message)
            };
        }

        let availability = self
            .session
            .check_availability(request.start, request.end)
            .await;
        if !availability.available {
            self.reschedule(conversation_id).await;
            let shown = self.session.show_date(request.date).await;
            let label = availability
                .conflicting_label
                .unwrap_or_else(|| "another event".to_string());
            tracing::info!(conversation_id, conflict = label.as_str(), "proposed slot conflicts");
            return TurnOutcome {
                success: false,
                message: format!(
                    "That time conflicts with \"{label}\". I've opened {} so you can pick another time.",
                    request.date.format("%Y-%m-%d")
                ),
                event: Some(request),
                mode_transition: shown.transition,
                missing: vec![SlotField::Time],
            };
        }

        if !self
            .session
            .create_event(&request.title, request.start, request.end)
            .await
        {
            return TurnOutcome {
                event: Some(request),
                ..TurnOutcome::failure(CREATE_FAILED_MESSAGE)
            };
        }

        if let Some(context) = self.conversations.lock().await.get_mut(conversation_id) {
            context.clear();
        }
        TurnOutcome {
            success: true,
            message: format!(
                "Scheduled \"{}\" on {} from {} to {}.",
                request.title,
                request.date.format("%Y-%m-%d"),
                request.start.format("%H:%M"),
                request.end.format("%H:%M")
            ),
            event: Some(request),
            mode_transition: None,
            missing: Vec::new(),
        }
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn reschedule(&self, conversation_id: &str) {
        if let Some(context) = self.conversations.lock().await.get_mut(conversation_id) {
            context.clear_for_reschedule();
        }
    }
}
