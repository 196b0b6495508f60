use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;
use voxcal_assistant::{SchedulingAssistant, END_BEFORE_START_MESSAGE, LOGIN_REQUIRED_MESSAGE};
use voxcal_browser::{
    BrowserAction, BrowserActionResult, BrowserExecutor, ContextOptions, DisplayMode,
    ModeTransition, SessionController, SessionControllerConfig, SessionLayer,
    SharedSessionController,
};
use voxcal_slots::{ConversationStore, ExtractionPayload, SlotField};

const CALENDAR_HOME: &str = "https://calendar.google.com/calendar";
const SIGN_IN_URL: &str =
    "https://accounts.google.com/v3/signin/identifier?continue=https://calendar.google.com/calendar";
const NOW: u64 = 1_704_400_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CalendarEntry {
    title: String,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Debug, Default)]
struct FakeCalendar {
    account_signed_in: bool,
    context_authenticated: bool,
    context_open: bool,
    current_url: String,
    events: Vec<CalendarEntry>,
    created: Vec<CalendarEntry>,
    hang_navigations: usize,
    contexts: Vec<ContextOptions>,
}

/// In-memory stand-in for the calendar web UI behind a browser driver.
#[derive(Clone, Default)]
struct FakeCalendarExecutor {
    calendar: Arc<AsyncMutex<FakeCalendar>>,
}

impl FakeCalendarExecutor {
    fn signed_in() -> Self {
        let executor = Self::default();
        executor
            .calendar
            .try_lock()
            .expect("fresh calendar")
            .account_signed_in = true;
        executor
    }

    async fn add_event(&self, title: &str, start: NaiveDateTime, end: NaiveDateTime) {
        self.calendar.lock().await.events.push(CalendarEntry {
            title: title.to_string(),
            start,
            end,
        });
    }

    async fn hang_next_navigations(&self, count: usize) {
        self.calendar.lock().await.hang_navigations = count;
    }

    /// The person completes the sign-in form in the visible window.
    async fn user_signs_in(&self) {
        let mut calendar = self.calendar.lock().await;
        calendar.account_signed_in = true;
        if calendar.context_open && calendar.current_url.contains("accounts.google.com") {
            calendar.context_authenticated = true;
            calendar.current_url = CALENDAR_HOME.to_string();
        }
    }

    async fn created(&self) -> Vec<CalendarEntry> {
        self.calendar.lock().await.created.clone()
    }

    async fn last_context_mode(&self) -> Option<DisplayMode> {
        self.calendar
            .lock()
            .await
            .contexts
            .last()
            .map(|options| options.mode)
    }
}

fn day_from_url(raw: &str) -> Option<NaiveDate> {
    let parsed = url::Url::parse(raw).ok()?;
    let segments = parsed.path_segments()?.collect::<Vec<_>>();
    let position = segments.iter().position(|segment| *segment == "day")?;
    let rest = segments.get(position + 1..position + 4)?;
    NaiveDate::parse_from_str(&rest.join("-"), "%Y-%m-%d").ok()
}

fn draft_from_url(raw: &str) -> Option<CalendarEntry> {
    let parsed = url::Url::parse(raw).ok()?;
    let mut title = None;
    let mut dates = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "text" => title = Some(value.into_owned()),
            "dates" => dates = Some(value.into_owned()),
            _ => {}
        }
    }
    let dates = dates?;
    let (start, end) = dates.split_once('/')?;
    Some(CalendarEntry {
        title: title?,
        start: NaiveDateTime::parse_from_str(start, "%Y%m%dT%H%M%S").ok()?,
        end: NaiveDateTime::parse_from_str(end, "%Y%m%dT%H%M%S").ok()?,
    })
}

#[async_trait]
impl BrowserExecutor for FakeCalendarExecutor {
    async fn start_runtime(&mut self) -> Result<()> {
        Ok(())
    }

    async fn open_context(&mut self, options: &ContextOptions) -> Result<()> {
        let mut calendar = self.calendar.lock().await;
        calendar.context_authenticated =
            options.storage_state.is_some() && calendar.account_signed_in;
        calendar.context_open = true;
        calendar.current_url = "about:blank".to_string();
        calendar.contexts.push(options.clone());
        Ok(())
    }

    async fn execute(&mut self, action: &BrowserAction) -> Result<BrowserActionResult> {
        let mut calendar = self.calendar.lock().await;
        if !calendar.context_open {
            return Ok(BrowserActionResult::failure(409, "browser_no_context"));
        }
        let result = match action {
            BrowserAction::Navigate { url, .. } => {
                if calendar.hang_navigations > 0 {
                    calendar.hang_navigations -= 1;
                    return Ok(BrowserActionResult::failure(504, "browser_timeout"));
                }
                calendar.current_url = if calendar.context_authenticated {
                    url.clone()
                } else {
                    SIGN_IN_URL.to_string()
                };
                BrowserActionResult::ok(json!({"url": calendar.current_url}))
            }
            BrowserAction::CurrentUrl => BrowserActionResult::ok(json!({"url": calendar.current_url})),
            BrowserAction::QueryTexts { selector, .. } => {
                let elements = match day_from_url(&calendar.current_url) {
                    Some(day) if selector == "[data-eventid]" => calendar
                        .events
                        .iter()
                        .chain(calendar.created.iter())
                        .filter(|event| event.start.date() == day)
                        .map(|event| {
                            json!({
                                "label": format!(
                                    "{} – {} {}",
                                    event.start.format("%H:%M"),
                                    event.end.format("%H:%M"),
                                    event.title
                                ),
                                "text": event.title,
                            })
                        })
                        .collect::<Vec<_>>(),
                    _ => Vec::new(),
                };
                BrowserActionResult::ok(json!({"elements": elements}))
            }
            BrowserAction::ClickFirst { selector, .. } => {
                let draft = calendar
                    .current_url
                    .contains("render?action=TEMPLATE")
                    .then(|| draft_from_url(&calendar.current_url))
                    .flatten();
                match draft {
                    Some(entry) if selector == r#"button:has-text("Save")"# => {
                        calendar.created.push(entry);
                        calendar.current_url = CALENDAR_HOME.to_string();
                        BrowserActionResult::ok(json!({}))
                    }
                    _ => BrowserActionResult::failure(404, "browser_selector_not_found"),
                }
            }
            BrowserAction::PressKey { .. } | BrowserAction::Settle { .. } => {
                BrowserActionResult::ok(json!({}))
            }
            BrowserAction::SaveStorageState => {
                if calendar.context_authenticated {
                    BrowserActionResult::ok(json!({"storage_state": {"cookies": [{"name": "SID"}]}}))
                } else {
                    BrowserActionResult::failure(409, "browser_no_context")
                }
            }
        };
        Ok(result)
    }

    async fn teardown(&mut self, layer: SessionLayer) -> Result<()> {
        let mut calendar = self.calendar.lock().await;
        if matches!(layer, SessionLayer::Page | SessionLayer::Context) {
            calendar.context_open = false;
            calendar.context_authenticated = false;
        }
        Ok(())
    }
}

struct Harness {
    _workspace: TempDir,
    session_path: PathBuf,
    calendar: FakeCalendarExecutor,
    assistant: SchedulingAssistant<FakeCalendarExecutor>,
}

impl Harness {
    fn new(calendar: FakeCalendarExecutor, persisted_session: bool) -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        let session_path = workspace.path().join("auth").join("calendar-session.json");
        if persisted_session {
            write_session(&session_path);
        }
        let config = SessionControllerConfig {
            persisted_session_path: session_path.clone(),
            navigation_timeout_ms: 1_000,
            login_timeout_ms: 1_000,
            confirm_timeout_ms: 100,
            settle_ms: 0,
            ..SessionControllerConfig::default()
        };
        let controller = SessionController::new(calendar.clone(), config);
        let assistant = SchedulingAssistant::new(
            SharedSessionController::new(controller),
            ConversationStore::new(600),
            DisplayMode::Headless,
        );
        Self {
            _workspace: workspace,
            session_path,
            calendar,
            assistant,
        }
    }

    async fn turn(&self, conversation_id: &str, payload: serde_json::Value) -> voxcal_assistant::TurnOutcome {
        let payload = ExtractionPayload::parse(&payload.to_string()).expect("payload");
        self.assistant
            .handle_turn_at(conversation_id, &payload, NOW)
            .await
    }
}

fn write_session(path: &Path) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("create auth dir");
    std::fs::write(path, r#"{"cookies":[{"name":"SID"}]}"#).expect("write session");
}

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .expect("timestamp")
}

#[tokio::test]
async fn integration_manual_login_then_multi_turn_request_creates_event() {
    let harness = Harness::new(FakeCalendarExecutor::default(), false);

    let outcome = harness.turn("kitchen", json!({"title": "Dentist", "partial": true})).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, LOGIN_REQUIRED_MESSAGE);
    assert_eq!(outcome.missing, vec![SlotField::Date, SlotField::Time]);

    let guidance = harness
        .assistant
        .start_manual_login()
        .await
        .expect("manual login starts");
    assert_eq!(
        guidance.transition,
        Some(ModeTransition {
            from: DisplayMode::Headless,
            to: DisplayMode::Visible,
        })
    );
    assert!(!harness.assistant.poll_login().await.logged_in);

    harness.calendar.user_signs_in().await;
    let poll = harness.assistant.poll_login().await;
    assert!(poll.logged_in);
    assert_eq!(
        poll.transition,
        Some(ModeTransition {
            from: DisplayMode::Visible,
            to: DisplayMode::Headless,
        })
    );
    assert!(harness.session_path.exists());
    assert_eq!(harness.calendar.last_context_mode().await, Some(DisplayMode::Headless));

    assert_eq!(
        harness.assistant.extraction_hint("kitchen").await,
        "Pending event: title: \"Dentist\"."
    );
    let first = harness.turn("kitchen", json!({"date": "2024-01-05", "partial": true})).await;
    assert!(!first.success);
    assert_eq!(first.message, "Please provide the time");
    assert_eq!(first.missing, vec![SlotField::Time]);

    let second = harness
        .turn("kitchen", json!({"start_time": "09:00", "end_time": "10:00"}))
        .await;
    assert!(second.success, "{}", second.message);
    assert_eq!(second.message, "Scheduled \"Dentist\" on 2024-01-05 from 09:00 to 10:00.");
    assert_eq!(
        harness.calendar.created().await,
        vec![CalendarEntry {
            title: "Dentist".to_string(),
            start: at(5, 9, 0),
            end: at(5, 10, 0),
        }]
    );
    assert_eq!(harness.assistant.extraction_hint("kitchen").await, "");
}

#[tokio::test]
async fn integration_conflict_opens_day_view_and_reschedule_keeps_title_and_date() {
    let calendar = FakeCalendarExecutor::signed_in();
    calendar.add_event("Team Sync", at(5, 14, 0), at(5, 15, 0)).await;
    let harness = Harness::new(calendar, true);

    let conflict = harness
        .turn(
            "office",
            json!({"title": "Design review", "date": "2024-01-05", "start_time": "14:30", "end_time": "15:30"}),
        )
        .await;
    assert!(!conflict.success);
    assert!(conflict.message.contains("\"Team Sync\""), "{}", conflict.message);
    assert!(conflict.message.contains("2024-01-05"));
    assert_eq!(conflict.missing, vec![SlotField::Time]);
    assert_eq!(
        conflict.mode_transition,
        Some(ModeTransition {
            from: DisplayMode::Headless,
            to: DisplayMode::Visible,
        })
    );
    assert!(harness.calendar.created().await.is_empty());
    assert_eq!(
        harness.assistant.extraction_hint("office").await,
        "Pending event: title: \"Design review\", date: 2024-01-05."
    );

    let rescheduled = harness
        .turn("office", json!({"start_time": "15:00", "end_time": "16:00"}))
        .await;
    assert!(rescheduled.success, "{}", rescheduled.message);
    assert_eq!(rescheduled.mode_transition, None);
    assert_eq!(
        harness.calendar.created().await,
        vec![CalendarEntry {
            title: "Design review".to_string(),
            start: at(5, 15, 0),
            end: at(5, 16, 0),
        }]
    );
}

#[tokio::test]
async fn integration_end_before_start_is_rejected_without_touching_calendar() {
    let harness = Harness::new(FakeCalendarExecutor::signed_in(), true);

    let outcome = harness
        .turn(
            "desk",
            json!({"title": "Standup", "date": "2024-01-08", "start_time": "10:00", "end_time": "09:30"}),
        )
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, END_BEFORE_START_MESSAGE);
    assert_eq!(outcome.missing, vec![SlotField::Time]);
    assert!(harness.calendar.created().await.is_empty());
    assert_eq!(
        harness.assistant.extraction_hint("desk").await,
        "Pending event: title: \"Standup\", date: 2024-01-08."
    );
}

#[tokio::test]
async fn integration_single_navigation_timeout_recovers_with_one_reconnect() {
    let harness = Harness::new(FakeCalendarExecutor::signed_in(), true);
    assert!(harness.assistant.ensure_session().await.expect("session starts"));
    harness.calendar.hang_next_navigations(1).await;

    let outcome = harness
        .turn(
            "car",
            json!({"title": "Oil change", "date": "2024-01-09", "start_time": "08:00", "end_time": "09:00"}),
        )
        .await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(harness.calendar.created().await.len(), 1);

    let stats = harness.assistant.session().lock().await.stats();
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn integration_conversations_fill_slots_independently() {
    let harness = Harness::new(FakeCalendarExecutor::signed_in(), true);

    let alice = harness.turn("alice", json!({"title": "Yoga", "partial": true})).await;
    let bob = harness
        .turn("bob", json!({"date": "2024-01-10", "start_time": "18:00", "end_time": "19:00"}))
        .await;
    assert_eq!(alice.missing, vec![SlotField::Date, SlotField::Time]);
    assert_eq!(bob.missing, vec![SlotField::Title]);
    assert_eq!(bob.message, "Please provide what the event is about");

    let alice = harness
        .turn("alice", json!({"date": "2024-01-11", "start_time": "07:00", "end_time": "08:00"}))
        .await;
    assert!(alice.success, "{}", alice.message);
    assert_eq!(
        harness.assistant.extraction_hint("bob").await,
        "Pending event: date: 2024-01-10, time: 18:00."
    );

    assert!(harness.assistant.reset_conversation("bob").await);
    assert_eq!(harness.assistant.extraction_hint("bob").await, "");
    assert_eq!(
        harness.calendar.created().await,
        vec![CalendarEntry {
            title: "Yoga".to_string(),
            start: at(11, 7, 0),
            end: at(11, 8, 0),
        }]
    );
}
