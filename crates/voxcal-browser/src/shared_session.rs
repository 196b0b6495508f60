use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::availability::Availability;
use crate::browser_executor::{BrowserExecutor, DisplayMode};
use crate::error::CalendarSessionResult;
use crate::session_controller::{
    LoginGuidance, LoginPoll, SessionController, SessionState, ShowDateOutcome,
};

/// Cloneable handle that serializes every operation on one session.
///
/// Each call holds the lock for its whole duration, so concurrent callers
/// queue in arrival order instead of interleaving mode and context changes.
pub struct SharedSessionController<E: BrowserExecutor> {
    inner: Arc<AsyncMutex<SessionController<E>>>,
}

impl<E: BrowserExecutor> Clone for SharedSessionController<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BrowserExecutor> SharedSessionController<E> {
    pub fn new(controller: SessionController<E>) -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(controller)),
        }
    }

    /// Exclusive access for multi-step sequences that must not interleave.
    pub async fn lock(&self) -> MutexGuard<'_, SessionController<E>> {
        self.inner.lock().await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state()
    }

    pub async fn ensure_session(&self, preferred: DisplayMode) -> CalendarSessionResult<bool> {
        self.inner.lock().await.ensure_session(preferred).await
    }

    pub async fn start_manual_login(&self) -> CalendarSessionResult<LoginGuidance> {
        self.inner.lock().await.start_manual_login().await
    }

    pub async fn poll_login_status(&self) -> LoginPoll {
        self.inner.lock().await.poll_login_status().await
    }

    pub async fn navigate_to_date(&self, date: NaiveDate) -> bool {
        self.inner.lock().await.navigate_to_date(date).await
    }

    pub async fn list_events_for_date(&self, date: NaiveDate) -> Vec<String> {
        self.inner.lock().await.list_events_for_date(date).await
    }

    pub async fn check_availability(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Availability {
        self.inner.lock().await.check_availability(start, end).await
    }

    pub async fn show_date(&self, date: NaiveDate) -> ShowDateOutcome {
        self.inner.lock().await.show_date(date).await
    }

    pub async fn create_event(&self, title: &str, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.inner
            .lock()
            .await
            .create_event(title, start, end)
            .await
    }

    pub async fn close(&self) {
        self.inner.lock().await.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    use super::SharedSessionController;
    use crate::browser_executor::{
        BrowserAction, BrowserActionResult, BrowserExecutor, ContextOptions, DisplayMode,
        SessionLayer,
    };
    use crate::session_controller::{SessionController, SessionControllerConfig};

    #[derive(Default)]
    struct InFlightCounter {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct SlowExecutor {
        counter: Arc<InFlightCounter>,
        url: String,
    }

    #[async_trait]
    impl BrowserExecutor for SlowExecutor {
        async fn start_runtime(&mut self) -> Result<()> {
            Ok(())
        }

        async fn open_context(&mut self, _options: &ContextOptions) -> Result<()> {
            Ok(())
        }

        async fn execute(&mut self, action: &BrowserAction) -> Result<BrowserActionResult> {
            let current = self.counter.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.counter.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let BrowserAction::Navigate { url, .. } = action {
                self.url = url.clone();
            }
            self.counter.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(BrowserActionResult::ok(json!({"url": self.url, "elements": []})))
        }

        async fn teardown(&mut self, _layer: SessionLayer) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn integration_concurrent_callers_queue_on_one_session() {
        let temp = tempdir().expect("tempdir");
        let config = SessionControllerConfig {
            persisted_session_path: temp.path().join("calendar-session.json"),
            settle_ms: 0,
            ..SessionControllerConfig::default()
        };
        voxcal_core::write_text_atomic(&config.persisted_session_path, r#"{"cookies":[]}"#)
            .expect("persist");
        let counter = Arc::new(InFlightCounter::default());
        let executor = SlowExecutor {
            counter: Arc::clone(&counter),
            url: "about:blank".to_string(),
        };
        let shared = SharedSessionController::new(SessionController::new(executor, config));
        assert!(shared
            .ensure_session(DisplayMode::Headless)
            .await
            .expect("ensure session"));

        let mut tasks = Vec::new();
        for day in 1..=6 {
            let handle = shared.clone();
            tasks.push(tokio::spawn(async move {
                let date = NaiveDate::from_ymd_opt(2024, 1, day).expect("date");
                if day % 2 == 0 {
                    handle.show_date(date).await.navigated
                } else {
                    handle.list_events_for_date(date).await.is_empty()
                }
            }));
        }
        for task in tasks {
            assert!(task.await.expect("join"));
        }

        assert_eq!(counter.max_in_flight.load(Ordering::SeqCst), 1);
        let state = shared.state().await;
        assert!(state.logged_in);
        assert_eq!(state.mode, DisplayMode::Visible);
        assert_eq!(shared.lock().await.stats().reconnects, 0);
    }
}
