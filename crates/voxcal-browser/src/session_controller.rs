use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voxcal_core::{read_text_if_present, write_text_atomic};

use crate::availability::{Availability, AvailabilityJudge, LocalOverlapJudge};
use crate::browser_executor::{
    BrowserAction, BrowserActionResult, BrowserExecutor, ContextOptions, DisplayMode,
    SessionLayer, Viewport,
};
use crate::calendar_target::{CalendarTarget, ConfirmTrigger};
use crate::error::{CalendarSessionError, CalendarSessionResult};
use crate::event_locator::EventLocator;

pub const DEFAULT_PERSISTED_SESSION_PATH: &str = ".voxcal/auth/calendar-session.json";
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_LOGIN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_SETTLE_MS: u64 = 2_000;

const MANUAL_LOGIN_GUIDANCE: &str =
    "A browser window is open on the calendar sign-in page. Log in there, then ask me to check again.";
const MANUAL_LOGIN_UNREACHABLE_GUIDANCE: &str =
    "A browser window is open, but the calendar sign-in page did not load. Reload it, log in, then ask me to check again.";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Timeouts and storage location for one calendar session.
pub struct SessionControllerConfig {
    pub persisted_session_path: PathBuf,
    pub navigation_timeout_ms: u64,
    pub login_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    /// Pause after navigations and confirm clicks so the calendar can render.
    pub settle_ms: u64,
    pub viewport: Viewport,
}

impl Default for SessionControllerConfig {
    fn default() -> Self {
        Self {
            persisted_session_path: PathBuf::from(DEFAULT_PERSISTED_SESSION_PATH),
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            login_timeout_ms: DEFAULT_LOGIN_TIMEOUT_MS,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Durable lifecycle phase; resume and reconnect attempts happen inside single calls.
pub enum SessionPhase {
    Uninitialized,
    LoggedOut,
    ManualLoginPending,
    LoggedIn,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub mode: DisplayMode,
    pub logged_in: bool,
    pub persisted_session_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// A display-mode change performed as part of an operation.
pub struct ModeTransition {
    pub from: DisplayMode,
    pub to: DisplayMode,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    pub reconnects: u64,
    pub navigations: u64,
    pub contexts_opened: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGuidance {
    pub message: String,
    pub transition: Option<ModeTransition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPoll {
    pub logged_in: bool,
    pub transition: Option<ModeTransition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowDateOutcome {
    pub navigated: bool,
    pub transition: Option<ModeTransition>,
}

/// Remote work that may be retried once after a context rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionOperation {
    Navigate { url: String, timeout_ms: u64 },
    ListEvents { date: NaiveDate },
}

impl SessionOperation {
    fn name(&self) -> &'static str {
        match self {
            SessionOperation::Navigate { .. } => "navigate",
            SessionOperation::ListEvents { .. } => "list_events",
        }
    }
}

enum OperationOutput {
    Navigated,
    Events(Vec<String>),
}

/// Owns the browser automation session against the web calendar.
///
/// Every method takes `&mut self`; callers sharing one controller across
/// tasks go through [`crate::SharedSessionController`].
pub struct SessionController<E: BrowserExecutor> {
    executor: E,
    config: SessionControllerConfig,
    target: CalendarTarget,
    locator: EventLocator,
    judge: Arc<dyn AvailabilityJudge>,
    phase: SessionPhase,
    mode: DisplayMode,
    runtime_started: bool,
    context_open: bool,
    stats: SessionStats,
}

impl<E: BrowserExecutor> std::fmt::Debug for SessionController<E> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionController")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("mode", &self.mode)
            .field("runtime_started", &self.runtime_started)
            .field("context_open", &self.context_open)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<E: BrowserExecutor> SessionController<E> {
    pub fn new(executor: E, config: SessionControllerConfig) -> Self {
        let target = CalendarTarget::default();
        Self {
            executor,
            config,
            locator: EventLocator::from_target(&target),
            target,
            judge: Arc::new(LocalOverlapJudge::default()),
            phase: SessionPhase::Uninitialized,
            mode: DisplayMode::Headless,
            runtime_started: false,
            context_open: false,
            stats: SessionStats::default(),
        }
    }

    pub fn with_target(mut self, target: CalendarTarget) -> Self {
        self.locator = EventLocator::from_target(&target);
        self.target = target;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn AvailabilityJudge>) -> Self {
        self.judge = judge;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_logged_in(&self) -> bool {
        self.phase == SessionPhase::LoggedIn
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn config(&self) -> &SessionControllerConfig {
        &self.config
    }

    pub fn target(&self) -> &CalendarTarget {
        &self.target
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            mode: self.mode,
            logged_in: self.is_logged_in(),
            persisted_session_path: self.config.persisted_session_path.clone(),
        }
    }

    /// Resumes from the persisted session in `preferred` mode.
    ///
    /// Only a runtime or browser launch failure is an error; a missing,
    /// corrupt, or expired persisted session yields `Ok(false)`.
    pub async fn initialize(&mut self, preferred: DisplayMode) -> CalendarSessionResult<bool> {
        self.ensure_runtime().await?;
        let has_persisted = self.persisted_storage_state().is_some();
        tracing::debug!(
            mode = %preferred,
            has_persisted,
            "attempting calendar session resume"
        );
        self.open_context(preferred)
            .await
            .map_err(|error| CalendarSessionError::SessionUnavailable(format!("{error:#}")))?;
        if !has_persisted {
            self.phase = SessionPhase::LoggedOut;
            return Ok(false);
        }

        let home = self.target.home_url();
        let timeout_ms = self.config.navigation_timeout_ms;
        if let Err(error) = self
            .run_with_reconnect(SessionOperation::Navigate {
                url: home,
                timeout_ms,
            })
            .await
        {
            tracing::warn!(code = error.code(), error = %error, "calendar session resume failed");
            self.phase = SessionPhase::LoggedOut;
            return Ok(false);
        }

        let authenticated = self.observe_authenticated().await;
        self.phase = if authenticated {
            tracing::info!(mode = %self.mode, "resumed authenticated calendar session");
            SessionPhase::LoggedIn
        } else {
            tracing::debug!("persisted calendar session is no longer authenticated");
            SessionPhase::LoggedOut
        };
        Ok(authenticated)
    }

    /// Resumes on first use; afterwards reports the current login state.
    pub async fn ensure_session(&mut self, preferred: DisplayMode) -> CalendarSessionResult<bool> {
        match self.phase {
            SessionPhase::Uninitialized => self.initialize(preferred).await,
            SessionPhase::LoggedIn => Ok(true),
            SessionPhase::ManualLoginPending => Ok(self.poll_login_status().await.logged_in),
            SessionPhase::LoggedOut => Ok(false),
        }
    }

    /// Opens the sign-in surface in a visible window and returns immediately.
    pub async fn start_manual_login(&mut self) -> CalendarSessionResult<LoginGuidance> {
        self.ensure_runtime().await?;
        let transition = self
            .switch_mode(DisplayMode::Visible)
            .await
            .map_err(|error| CalendarSessionError::SessionUnavailable(format!("{error:#}")))?;
        self.phase = SessionPhase::ManualLoginPending;

        let url = self.target.home_url();
        let timeout_ms = self.config.login_timeout_ms;
        let message = match self
            .run_with_reconnect(SessionOperation::Navigate { url, timeout_ms })
            .await
        {
            Ok(_) => MANUAL_LOGIN_GUIDANCE,
            Err(error) => {
                tracing::warn!(code = error.code(), error = %error, "sign-in page did not load");
                MANUAL_LOGIN_UNREACHABLE_GUIDANCE
            }
        };
        Ok(LoginGuidance {
            message: message.to_string(),
            transition,
        })
    }

    /// Checks whether the user finished signing in.
    ///
    /// On first detection the session blob is persisted and the browser
    /// returns to headless mode. Idempotent once logged in.
    pub async fn poll_login_status(&mut self) -> LoginPoll {
        if self.is_logged_in() {
            return LoginPoll {
                logged_in: true,
                transition: None,
            };
        }
        if !self.context_open || !self.observe_authenticated().await {
            return LoginPoll {
                logged_in: false,
                transition: None,
            };
        }
        if let Err(error) = self.persist_storage_state().await {
            tracing::warn!(error = %format!("{error:#}"), "failed to persist calendar session");
            return LoginPoll {
                logged_in: false,
                transition: None,
            };
        }
        self.phase = SessionPhase::LoggedIn;
        tracing::info!(
            path = %self.config.persisted_session_path.display(),
            "calendar login detected and persisted"
        );

        let transition = match self.switch_mode(DisplayMode::Headless).await {
            Ok(transition) => transition,
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "failed to return to headless mode");
                None
            }
        };
        LoginPoll {
            logged_in: true,
            transition,
        }
    }

    pub async fn switch_to_visible(&mut self) -> CalendarSessionResult<Option<ModeTransition>> {
        self.ensure_runtime().await?;
        self.switch_mode(DisplayMode::Visible)
            .await
            .map_err(CalendarSessionError::executor)
    }

    pub async fn switch_to_headless(&mut self) -> CalendarSessionResult<Option<ModeTransition>> {
        self.ensure_runtime().await?;
        self.switch_mode(DisplayMode::Headless)
            .await
            .map_err(CalendarSessionError::executor)
    }

    pub async fn navigate_to_date(&mut self, date: NaiveDate) -> bool {
        if let Err(error) = self.require_login() {
            tracing::debug!(date = %date, code = error.code(), "skipping navigation");
            return false;
        }
        let url = self.target.day_view_url(date);
        let timeout_ms = self.config.navigation_timeout_ms;
        match self
            .run_with_reconnect(SessionOperation::Navigate { url, timeout_ms })
            .await
        {
            Ok(_) => {
                self.settle().await;
                true
            }
            Err(error) => {
                tracing::warn!(date = %date, code = error.code(), error = %error, "day navigation failed");
                false
            }
        }
    }

    /// Raw event descriptions in render order; empty when nothing could be scraped.
    pub async fn list_events_for_date(&mut self, date: NaiveDate) -> Vec<String> {
        if let Err(error) = self.require_login() {
            tracing::debug!(date = %date, code = error.code(), "skipping event scrape");
            return Vec::new();
        }
        match self
            .run_with_reconnect(SessionOperation::ListEvents { date })
            .await
        {
            Ok(OperationOutput::Events(events)) => events,
            Ok(OperationOutput::Navigated) => Vec::new(),
            Err(CalendarSessionError::ScrapeEmpty { .. }) => {
                tracing::debug!(date = %date, "no events rendered");
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(date = %date, code = error.code(), error = %error, "event scrape failed");
                Vec::new()
            }
        }
    }

    /// Judges the proposed slot against the events on `start`'s date.
    ///
    /// Any failure along the way reports the slot as available.
    pub async fn check_availability(
        &mut self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Availability {
        let events = self.list_events_for_date(start.date()).await;
        if events.is_empty() {
            return Availability::free();
        }
        match self.judge.judge(&events, start, end).await {
            Ok(availability) => {
                tracing::debug!(
                    start = %start,
                    end = %end,
                    events = events.len(),
                    available = availability.available,
                    "availability judged"
                );
                availability
            }
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "availability judge failed; assuming free");
                Availability::free()
            }
        }
    }

    /// Shows `date` in a visible window so a person can review it.
    pub async fn show_date(&mut self, date: NaiveDate) -> ShowDateOutcome {
        let transition = match self.switch_to_visible().await {
            Ok(transition) => transition,
            Err(error) => {
                tracing::warn!(code = error.code(), error = %error, "could not make session visible");
                return ShowDateOutcome {
                    navigated: false,
                    transition: None,
                };
            }
        };
        ShowDateOutcome {
            navigated: self.navigate_to_date(date).await,
            transition,
        }
    }

    /// Opens a prefilled draft and confirms it through the trigger chain.
    ///
    /// The draft navigation may be retried after a reconnect; the confirm
    /// chain is never retried so a saved event cannot be saved twice.
    pub async fn create_event(
        &mut self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> bool {
        if let Err(error) = self.require_login() {
            tracing::debug!(code = error.code(), "skipping event creation");
            return false;
        }
        let url = self.target.event_template_url(title, start, end);
        let timeout_ms = self.config.navigation_timeout_ms;
        if let Err(error) = self
            .run_with_reconnect(SessionOperation::Navigate { url, timeout_ms })
            .await
        {
            tracing::warn!(code = error.code(), error = %error, "event draft did not load");
            return false;
        }
        self.settle().await;

        let triggers = self.target.confirm_triggers.clone();
        for trigger in &triggers {
            match self.exercise_confirm_trigger(trigger).await {
                Ok(()) => {
                    self.settle().await;
                    tracing::info!(title, start = %start, end = %end, "calendar event confirmed");
                    return true;
                }
                Err(error) => {
                    tracing::debug!(code = error.code(), error = %error, "confirm trigger unavailable");
                }
            }
        }
        tracing::warn!(title, "no confirm trigger could be exercised");
        false
    }

    /// Tears down page, context, browser, and runtime; every layer is attempted.
    pub async fn close(&mut self) {
        if !self.runtime_started {
            return;
        }
        for layer in SessionLayer::TEARDOWN_ORDER {
            if let Err(error) = self.executor.teardown(layer).await {
                tracing::warn!(
                    layer = layer.as_str(),
                    error = %format!("{error:#}"),
                    "session teardown failed"
                );
            }
        }
        self.context_open = false;
        self.runtime_started = false;
        self.phase = SessionPhase::Uninitialized;
        tracing::debug!("calendar session closed");
    }

    async fn ensure_runtime(&mut self) -> CalendarSessionResult<()> {
        if self.runtime_started {
            return Ok(());
        }
        self.executor
            .start_runtime()
            .await
            .map_err(|error| CalendarSessionError::SessionUnavailable(format!("{error:#}")))?;
        self.runtime_started = true;
        tracing::debug!("browser runtime started");
        Ok(())
    }

    fn require_login(&self) -> CalendarSessionResult<()> {
        if self.is_logged_in() {
            Ok(())
        } else {
            Err(CalendarSessionError::NotAuthenticated)
        }
    }

    /// Persisted session path when it holds a readable JSON object.
    fn persisted_storage_state(&self) -> Option<PathBuf> {
        let path = &self.config.persisted_session_path;
        let raw = read_text_if_present(path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(_)) => Some(path.clone()),
            _ => {
                tracing::warn!(path = %path.display(), "ignoring corrupt persisted calendar session");
                None
            }
        }
    }

    async fn persist_storage_state(&mut self) -> anyhow::Result<()> {
        let result = self
            .executor
            .execute(&BrowserAction::SaveStorageState)
            .await?;
        if !result.is_success() {
            anyhow::bail!(
                "save_storage_state failed with status {} ({})",
                result.status_code,
                result.error_code
            );
        }
        let Some(blob) = result
            .response_body
            .get("storage_state")
            .filter(|blob| blob.is_object())
        else {
            anyhow::bail!("save_storage_state returned no storage_state object");
        };
        let rendered = serde_json::to_string_pretty(blob)?;
        write_text_atomic(&self.config.persisted_session_path, &rendered)
    }

    /// Closes the open context (if any) and opens a fresh one in `mode`.
    async fn open_context(&mut self, mode: DisplayMode) -> anyhow::Result<()> {
        if self.context_open {
            self.teardown_browsing().await;
        }
        let options = ContextOptions {
            mode,
            storage_state: self.persisted_storage_state(),
            viewport: self.config.viewport,
        };
        self.executor.open_context(&options).await?;
        self.context_open = true;
        self.mode = mode;
        self.stats.contexts_opened = self.stats.contexts_opened.saturating_add(1);
        tracing::debug!(
            mode = %mode,
            restored = options.storage_state.is_some(),
            "browsing context opened"
        );
        Ok(())
    }

    async fn teardown_browsing(&mut self) {
        for layer in SessionLayer::BROWSING_LAYERS {
            if let Err(error) = self.executor.teardown(layer).await {
                tracing::warn!(
                    layer = layer.as_str(),
                    error = %format!("{error:#}"),
                    "browsing layer teardown failed"
                );
            }
        }
        self.context_open = false;
    }

    async fn switch_mode(&mut self, mode: DisplayMode) -> anyhow::Result<Option<ModeTransition>> {
        if self.context_open && self.mode == mode {
            return Ok(None);
        }
        let from = self.mode;
        self.open_context(mode).await?;
        if from != mode {
            tracing::debug!(from = %from, to = %mode, "display mode switched");
            return Ok(Some(ModeTransition { from, to: mode }));
        }
        Ok(None)
    }

    async fn observe_authenticated(&mut self) -> bool {
        match self.current_url().await {
            Ok(url) => self.target.is_authenticated_url(&url),
            Err(error) => {
                tracing::debug!(code = error.code(), error = %error, "current url unavailable");
                false
            }
        }
    }

    async fn current_url(&mut self) -> CalendarSessionResult<String> {
        let result = self
            .executor
            .execute(&BrowserAction::CurrentUrl)
            .await
            .map_err(CalendarSessionError::executor)?;
        if !result.is_success() {
            return Err(failed_action("current_url", &result));
        }
        Ok(result.string_field("url").unwrap_or_default().to_string())
    }

    async fn settle(&mut self) {
        if self.config.settle_ms == 0 {
            return;
        }
        let action = BrowserAction::Settle {
            duration_ms: self.config.settle_ms,
        };
        if let Err(error) = self.executor.execute(&action).await {
            tracing::debug!(error = %format!("{error:#}"), "settle interrupted");
        }
    }

    async fn exercise_confirm_trigger(&mut self, trigger: &ConfirmTrigger) -> CalendarSessionResult<()> {
        let (action, description) = match trigger {
            ConfirmTrigger::Selector(selector) => (
                BrowserAction::ClickFirst {
                    selector: selector.clone(),
                    timeout_ms: self.config.confirm_timeout_ms,
                },
                selector.clone(),
            ),
            ConfirmTrigger::Key(key) => (
                BrowserAction::PressKey { key: key.clone() },
                format!("key {key}"),
            ),
        };
        let result = self
            .executor
            .execute(&action)
            .await
            .map_err(CalendarSessionError::executor)?;
        if result.is_success() {
            tracing::debug!(trigger = description.as_str(), "confirm trigger exercised");
            return Ok(());
        }
        if result.is_not_found() || result.is_timeout() {
            return Err(CalendarSessionError::ConfirmTriggerNotFound {
                selector: description,
            });
        }
        Err(failed_action(action.operation(), &result))
    }

    /// Runs `operation`, rebuilding the context and retrying at most once.
    async fn run_with_reconnect(
        &mut self,
        operation: SessionOperation,
    ) -> CalendarSessionResult<OperationOutput> {
        let first_error = match self.run_once(&operation).await {
            Ok(output) => return Ok(output),
            Err(error) if error.is_reconnectable() => error,
            Err(error) => return Err(error),
        };
        tracing::warn!(
            operation = operation.name(),
            code = first_error.code(),
            error = %first_error,
            "reconnecting calendar session"
        );
        self.reconnect().await?;
        self.run_once(&operation).await
    }

    async fn reconnect(&mut self) -> CalendarSessionResult<()> {
        self.stats.reconnects = self.stats.reconnects.saturating_add(1);
        self.teardown_browsing().await;
        let mode = self.mode;
        let error = match self.open_context(mode).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        tracing::warn!(
            error = %format!("{error:#}"),
            "browsing context did not reopen; relaunching browser runtime"
        );
        self.restart_runtime().await?;
        self.open_context(mode)
            .await
            .map_err(CalendarSessionError::executor)
    }

    /// Stops the runtime, then starts a fresh one; a dead driver cannot open contexts.
    async fn restart_runtime(&mut self) -> CalendarSessionResult<()> {
        if let Err(error) = self.executor.teardown(SessionLayer::Runtime).await {
            tracing::warn!(error = %format!("{error:#}"), "runtime teardown failed");
        }
        self.runtime_started = false;
        self.context_open = false;
        self.ensure_runtime().await
    }

    async fn run_once(&mut self, operation: &SessionOperation) -> CalendarSessionResult<OperationOutput> {
        if !self.context_open {
            let mode = self.mode;
            self.open_context(mode)
                .await
                .map_err(CalendarSessionError::executor)?;
        }
        match operation {
            SessionOperation::Navigate { url, timeout_ms } => {
                self.navigate_once(url, *timeout_ms).await?;
                Ok(OperationOutput::Navigated)
            }
            SessionOperation::ListEvents { date } => {
                let url = self.target.day_view_url(*date);
                let timeout_ms = self.config.navigation_timeout_ms;
                self.navigate_once(&url, timeout_ms).await?;
                self.settle().await;
                let events = self.locator.locate(&mut self.executor, *date).await?;
                Ok(OperationOutput::Events(events))
            }
        }
    }

    async fn navigate_once(&mut self, url: &str, timeout_ms: u64) -> CalendarSessionResult<()> {
        self.stats.navigations = self.stats.navigations.saturating_add(1);
        let action = BrowserAction::Navigate {
            url: url.to_string(),
            timeout_ms,
        };
        let result = self
            .executor
            .execute(&action)
            .await
            .map_err(CalendarSessionError::executor)?;
        if result.is_success() {
            tracing::debug!(url, "navigated");
            return Ok(());
        }
        if result.is_timeout() {
            return Err(CalendarSessionError::NavigationTimeout {
                url: url.to_string(),
            });
        }
        Err(failed_action("navigate", &result))
    }
}

fn failed_action(operation: &str, result: &BrowserActionResult) -> CalendarSessionError {
    CalendarSessionError::Executor(format!(
        "{operation} failed with status {} ({})",
        result.status_code, result.error_code
    ))
}
