use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
/// Failure taxonomy for calendar session operations.
pub enum CalendarSessionError {
    #[error("browser session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("navigation to {url} timed out")]
    NavigationTimeout { url: String },
    #[error("calendar session is not authenticated")]
    NotAuthenticated,
    #[error("confirm trigger '{selector}' not found")]
    ConfirmTriggerNotFound { selector: String },
    #[error("no events rendered for {date}")]
    ScrapeEmpty { date: NaiveDate },
    #[error("browser executor failure: {0}")]
    Executor(String),
}

impl CalendarSessionError {
    /// True when a full context rebuild may clear the failure.
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            CalendarSessionError::NavigationTimeout { .. } | CalendarSessionError::Executor(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            CalendarSessionError::SessionUnavailable(_) => "session_unavailable",
            CalendarSessionError::NavigationTimeout { .. } => "navigation_timeout",
            CalendarSessionError::NotAuthenticated => "not_authenticated",
            CalendarSessionError::ConfirmTriggerNotFound { .. } => "confirm_trigger_not_found",
            CalendarSessionError::ScrapeEmpty { .. } => "scrape_empty",
            CalendarSessionError::Executor(_) => "executor_failure",
        }
    }

    /// Short end-user wording; never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            CalendarSessionError::SessionUnavailable(_) => {
                "The calendar browser could not be started."
            }
            CalendarSessionError::NavigationTimeout { .. } => "The calendar took too long to load.",
            CalendarSessionError::NotAuthenticated => "Please log in to your calendar first.",
            CalendarSessionError::ConfirmTriggerNotFound { .. } => {
                "The calendar did not show a save button."
            }
            CalendarSessionError::ScrapeEmpty { .. } => "No events were found on that day.",
            CalendarSessionError::Executor(_) => "The calendar browser stopped responding.",
        }
    }

    pub(crate) fn executor(error: anyhow::Error) -> Self {
        CalendarSessionError::Executor(format!("{error:#}"))
    }
}

pub type CalendarSessionResult<T> = Result<T, CalendarSessionError>;
