//! Browser-driven calendar session for voxcal.
//!
//! Owns the long-lived automation session against the web calendar UI
//! (resume, manual login capture, display-mode switching, bounded reconnect),
//! the day-view scraper, and the availability judgment built on top of it.

pub mod availability;
pub mod browser_executor;
pub mod calendar_target;
pub mod error;
pub mod event_locator;
pub mod overlap;
pub mod session_controller;
pub mod shared_session;
pub mod time_locale;

pub use availability::{Availability, AvailabilityJudge, LocalOverlapJudge};
pub use browser_executor::{
    BrowserAction, BrowserActionResult, BrowserExecutor, ContextOptions, DisplayMode,
    PlaywrightDriverConfig, PlaywrightDriverExecutor, SessionLayer, Viewport,
};
pub use calendar_target::{CalendarTarget, ConfirmTrigger};
pub use error::{CalendarSessionError, CalendarSessionResult};
pub use event_locator::EventLocator;
pub use overlap::overlaps;
pub use session_controller::{
    LoginGuidance, LoginPoll, ModeTransition, SessionController, SessionControllerConfig,
    SessionPhase, SessionState, SessionStats, ShowDateOutcome,
};
pub use shared_session::SharedSessionController;
pub use time_locale::{
    ChineseTimeLocale, EnglishTimeLocale, LocatedRange, TimeLocale, TimeLocaleRegistry,
};
